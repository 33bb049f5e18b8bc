//! Per-transaction processing
//!
//! A `Processor` drives one transaction from HANDLED to a terminal status:
//! it creates the provider order, then reconciles provider-reported status
//! into the canonical lifecycle. Polling providers get one poll loop per
//! transaction; batch providers are swept by a `BatchSweeper` that reuses
//! the same per-record `reconcile` step.

mod sweeper;

pub use sweeper::BatchSweeper;

use crate::cache::{CoinInfo, RateCache};
use crate::config::ProcessorConfig;
use crate::error::{EngineError, EngineResult, ProviderError};
use crate::metrics;
use crate::providers::{
    EmergencyRequest, OrderRef, OrderRequest, ProviderClient, ProviderKind, ProviderOrder,
    Reconciliation,
};
use crate::state::TransactionStore;
use crate::transaction::{
    EmergencyChoice, Received, StatusCode, Transaction, TransactionStatus, TransactionUpdate,
};

use chrono::Utc;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of applying one provider observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Canonical status the provider reported, `None` if it was unmapped
    pub observed: Option<TransactionStatus>,
    /// Stored status after the cycle
    pub current: TransactionStatus,
}

/// Why a poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    Terminal(TransactionStatus),
    /// Gave up after too many EXPIRED observations; the row stays EXPIRED
    ExpiredLimit,
}

#[derive(Clone)]
pub struct Processor {
    store: Arc<dyn TransactionStore>,
    cache: RateCache,
    provider: Arc<dyn ProviderClient>,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        cache: RateCache,
        provider: Arc<dyn ProviderClient>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            cache,
            provider,
            config,
        }
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    /// Full lifecycle for one transaction. Creates the order if none exists
    /// yet, then polls when the provider is reconciled per transaction.
    pub async fn run(&self, id: Uuid) -> EngineResult<()> {
        let tx = self.store.get(id).await?;

        if tx.transaction_id.is_none() {
            if tx.status != TransactionStatus::Handled {
                warn!("Transaction {} in {} has no provider order, skipping", id, tx.status);
                return Ok(());
            }
            if !self.create(&tx).await? {
                return Ok(());
            }
        }

        match self.provider.reconciliation() {
            Reconciliation::Polling => {
                let exit = self.poll(id).await?;
                info!("Stopped polling transaction {}: {:?}", id, exit);
            }
            Reconciliation::Batch => {
                debug!("Transaction {} left to the {} sweeper", id, self.provider.kind());
            }
        }
        Ok(())
    }

    /// Provider coin mapping, or `None` after failing the transaction with
    /// UNDEFINED_COIN. A cache error counts as a missing mapping.
    async fn resolve_coin(
        &self,
        tx: &Transaction,
        coin: &str,
        network: &str,
    ) -> EngineResult<Option<CoinInfo>> {
        let provider = self.provider.kind();
        let info = match self.cache.get_coin_info(provider, coin, network).await {
            Ok(info) => info,
            Err(e) => {
                warn!(%provider, coin, network, "Coin info lookup failed: {}", e);
                None
            }
        };
        if info.is_none() {
            let missing = EngineError::CoinInfoMissing {
                provider,
                coin: coin.to_string(),
                network: network.to_string(),
            };
            self.fail(tx.id, StatusCode::UndefinedCoin, &missing.to_string())
                .await?;
        }
        Ok(info)
    }

    /// HANDLED -> CREATED or ERROR. Returns whether an order now exists.
    pub async fn create(&self, tx: &Transaction) -> EngineResult<bool> {
        let provider = self.provider.kind();

        let Some(from) = self
            .resolve_coin(tx, &tx.from_currency, &tx.from_network)
            .await?
        else {
            return Ok(false);
        };
        let Some(to) = self.resolve_coin(tx, &tx.to_currency, &tx.to_network).await? else {
            return Ok(false);
        };

        let request = OrderRequest {
            rate_type: tx.rate_type,
            direction: tx.direction,
            from_code: from.provider_code,
            from_network: from.provider_network,
            to_code: to.provider_code,
            to_network: to.provider_network,
            amount: tx.amount,
            to_address: tx.to_address.clone(),
            to_tag: tx.to_tag.clone(),
            refund_address: tx.refund_address.clone(),
            refund_tag: tx.refund_tag.clone(),
        };

        let order = match self.provider.create_order(&request).await {
            Ok(order) => order,
            Err(e) => {
                let code = match e {
                    ProviderError::InvalidAddress(_) => StatusCode::InvalidAddressCode,
                    ProviderError::OutOfLimits(_) => StatusCode::OutOfLimitsCode,
                    ProviderError::PartnerInternal(_) => StatusCode::PartnerInternalCode,
                    _ => StatusCode::UndefinedErrorCode,
                };
                self.fail(tx.id, code, &e.to_string()).await?;
                return Ok(false);
            }
        };

        let update = TransactionUpdate {
            final_from: Some(order.from),
            final_to: Some(order.to),
            final_back: Some(order.back),
            transaction_id: Some(order.id.clone()),
            transaction_token: order.token,
            registered_at: order.registered_at,
            expires_at: order.expires_at,
            ..TransactionUpdate::status(TransactionStatus::Created)
        };
        self.store.update(tx.id, &update).await?;

        metrics::record_order_created(provider);
        metrics::record_status_transition(provider, TransactionStatus::Created);
        info!(
            "Created {} order {} for transaction {}",
            provider, order.id, tx.id
        );
        Ok(true)
    }

    /// Terminal failure with a user-facing code. `detail` goes to the log only.
    async fn fail(&self, id: Uuid, code: StatusCode, detail: &str) -> EngineResult<()> {
        let provider = self.provider.kind();
        error!(%provider, status_code = %code, "Transaction {} failed: {}", id, detail);
        self.store
            .update(id, &TransactionUpdate::failed(code, code.user_message()))
            .await?;
        metrics::record_transaction_failed(Some(provider), code);
        Ok(())
    }

    /// Apply one provider observation to the stored row. The row is re-read
    /// first so fields written by other components are never clobbered.
    pub async fn reconcile(&self, id: Uuid, order: &ProviderOrder) -> EngineResult<ReconcileOutcome> {
        let provider = self.provider.kind();
        let tx = self.store.get(id).await?;

        if tx.status.is_terminal() {
            return Ok(ReconcileOutcome {
                observed: None,
                current: tx.status,
            });
        }

        let observed = match self.provider.map_status(&order.native_status) {
            Ok(status) => status,
            Err(e) => {
                warn!(%provider, "Skipping cycle for transaction {}: {}", id, e);
                metrics::record_unknown_status(provider);
                return Ok(ReconcileOutcome {
                    observed: None,
                    current: tx.status,
                });
            }
        };

        let mut update = if tx.status.can_transition_to(observed) {
            TransactionUpdate::status(observed)
        } else {
            if tx.status != observed {
                debug!("Ignoring {} -> {} for transaction {}", tx.status, observed, id);
            }
            TransactionUpdate::default()
        };
        update.received_from = changed(&tx.received_from, &order.received_from);
        update.received_to = changed(&tx.received_to, &order.received_to);
        update.received_back = changed(&tx.received_back, &order.received_back);

        let tx = if update.is_empty() {
            tx
        } else {
            self.store.update(id, &update).await?
        };

        if let Some(status) = update.status {
            info!("Transaction {} is now {} at {}", id, status, provider);
            metrics::record_status_transition(provider, status);
            if status.is_terminal() {
                let elapsed = Utc::now().signed_duration_since(tx.created_at);
                metrics::record_completion(provider, elapsed.num_milliseconds() as f64 / 1000.0);
            }
        }

        let tx = if tx.emergency_pending() {
            self.resolve_emergency(tx).await?
        } else {
            tx
        };

        Ok(ReconcileOutcome {
            observed: Some(observed),
            current: tx.status,
        })
    }

    /// Forward the recorded emergency choice to the provider, at most once
    /// per recorded choice
    async fn resolve_emergency(&self, tx: Transaction) -> EngineResult<Transaction> {
        let Some(order_id) = tx.transaction_id.clone() else {
            return Err(EngineError::Internal(format!(
                "emergency on transaction {} without provider order",
                tx.id
            )));
        };

        let guard = TransactionUpdate {
            made_emergency_action: Some(true),
            ..Default::default()
        };
        let tx = self.store.update(tx.id, &guard).await?;

        let request = EmergencyRequest {
            order: OrderRef {
                id: order_id,
                token: tx.transaction_token.clone(),
            },
            choice: tx.emergency_choice,
            address: tx.emergency_address.clone(),
            tag: tx.emergency_tag.clone(),
        };

        let update = match self.provider.emergency(&request).await {
            Ok(()) => {
                info!(
                    "Emergency {} accepted for transaction {}",
                    tx.emergency_choice.as_str(),
                    tx.id
                );
                TransactionUpdate {
                    is_emergency_handled: Some(true),
                    ..Default::default()
                }
            }
            Err(ProviderError::InvalidAddress(detail)) => {
                warn!("Emergency address rejected for transaction {}: {}", tx.id, detail);
                let code = StatusCode::EmergencyInvalidAddress;
                TransactionUpdate {
                    status_code: Some(code),
                    status_message: Some(code.user_message().to_string()),
                    emergency_choice: Some(EmergencyChoice::None),
                    made_emergency_action: Some(false),
                    is_status_shown: Some(false),
                    ..Default::default()
                }
            }
            Err(e) if e.is_retryable() => {
                warn!("Emergency action for transaction {} will be retried: {}", tx.id, e);
                TransactionUpdate {
                    made_emergency_action: Some(false),
                    ..Default::default()
                }
            }
            Err(e) => {
                error!("Emergency action for transaction {} failed: {}", tx.id, e);
                let code = StatusCode::EmergencyFailed;
                TransactionUpdate {
                    status_code: Some(code),
                    status_message: Some(code.user_message().to_string()),
                    is_status_shown: Some(false),
                    ..Default::default()
                }
            }
        };

        self.store.update(tx.id, &update).await
    }

    /// Per-transaction reconciliation loop. Cycle failures are logged and
    /// retried on the next tick; only a vanished row ends the loop early.
    pub async fn poll(&self, id: Uuid) -> EngineResult<PollExit> {
        let mut delay = self.config.poll_interval();
        let mut expired_seen = 0u32;

        loop {
            sleep(delay).await;

            let tx = match self.store.get(id).await {
                Ok(tx) => tx,
                Err(e @ EngineError::TransactionNotFound(_)) => return Err(e),
                Err(e) => {
                    warn!("Poll read failed for transaction {}: {}", id, e);
                    continue;
                }
            };
            if tx.status.is_terminal() {
                return Ok(PollExit::Terminal(tx.status));
            }
            let Some(order_id) = tx.transaction_id.clone() else {
                return Err(EngineError::Internal(format!(
                    "transaction {} has no provider order to poll",
                    id
                )));
            };

            let order = OrderRef {
                id: order_id,
                token: tx.transaction_token.clone(),
            };
            let cycle = match self.provider.order_status(&order).await {
                Ok(found) => self.reconcile(id, &found).await,
                Err(e) => Err(e.into()),
            };

            let outcome = match cycle {
                Ok(outcome) => outcome,
                Err(e @ EngineError::TransactionNotFound(_)) => return Err(e),
                Err(e) => {
                    warn!("Poll cycle failed for transaction {}: {}", id, e);
                    continue;
                }
            };

            if outcome.current.is_terminal() {
                return Ok(PollExit::Terminal(outcome.current));
            }

            match outcome.observed {
                Some(TransactionStatus::Expired) => {
                    expired_seen += 1;
                    if expired_seen >= self.config.max_expired_checks {
                        warn!(
                            "Transaction {} still expired after {} checks, giving up",
                            id, expired_seen
                        );
                        return Ok(PollExit::ExpiredLimit);
                    }
                    if expired_seen >= self.config.escalate_after_expired {
                        delay = self.config.expired_poll_interval();
                    }
                }
                Some(_) => {
                    expired_seen = 0;
                    delay = self.config.poll_interval();
                }
                None => {}
            }
        }
    }
}

/// Received data worth writing: present and different from what is stored
fn changed(stored: &Received, reported: &Received) -> Option<Received> {
    if reported.is_empty() || reported == stored {
        None
    } else {
        Some(reported.clone())
    }
}
