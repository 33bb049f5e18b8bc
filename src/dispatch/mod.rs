//! Transaction dispatch
//!
//! The dispatcher turns claimed (HANDLED) transactions into running
//! processors. It owns the supervised registry of in-flight processor tasks,
//! so a transaction can never have two processors in this process, and it
//! starts the per-provider batch sweepers.

use crate::cache::RateCache;
use crate::config::{EngineConfig, ProcessorConfig, ProviderConfig, SelectionPolicy};
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::processor::{BatchSweeper, Processor};
use crate::providers::{ProviderClient, ProviderKind, ProviderRegistry, Reconciliation};
use crate::rates::RateAggregator;
use crate::state::TransactionStore;
use crate::transaction::{StatusCode, Transaction, TransactionStatus, TransactionUpdate};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PROCESSOR_TASK: &str = "processor";
const SWEEPER_TASK: &str = "sweeper";

struct ProcessorHandle {
    generation: u64,
    provider: ProviderKind,
    started_at: DateTime<Utc>,
    abort: AbortHandle,
}

/// Snapshot of one running processor
#[derive(Debug, Clone, Serialize)]
pub struct InFlight {
    pub transaction_id: Uuid,
    pub provider: ProviderKind,
    pub started_at: DateTime<Utc>,
}

pub struct TransactionDispatcher {
    store: Arc<dyn TransactionStore>,
    cache: RateCache,
    registry: Arc<ProviderRegistry>,
    aggregator: RateAggregator,
    engine: EngineConfig,
    processor_config: ProcessorConfig,
    processors: Arc<DashMap<Uuid, ProcessorHandle>>,
    sweepers: DashMap<ProviderKind, AbortHandle>,
    generation: AtomicU64,
}

impl TransactionDispatcher {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        cache: RateCache,
        registry: Arc<ProviderRegistry>,
        engine: EngineConfig,
        processor_config: ProcessorConfig,
    ) -> Self {
        let aggregator = RateAggregator::new(cache.clone(), registry.priority().to_vec());
        Self {
            store,
            cache,
            registry,
            aggregator,
            engine,
            processor_config,
            processors: Arc::new(DashMap::new()),
            sweepers: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    fn processor(&self, client: Arc<dyn ProviderClient>) -> Processor {
        Processor::new(
            self.store.clone(),
            self.cache.clone(),
            client,
            self.processor_config.clone(),
        )
    }

    /// Start processing a claimed transaction without waiting for it.
    ///
    /// The caller must already have moved the row NEW -> HANDLED atomically.
    /// Returns the selected provider, or `None` if the transaction was
    /// failed instead: RATE_NOT_FOUND when no provider quotes the pair,
    /// UNDEFINED_ERROR_CODE when its provider is not configured here.
    pub async fn add(&self, tx: Transaction) -> EngineResult<Option<ProviderKind>> {
        if tx.status != TransactionStatus::Handled {
            return Err(EngineError::InvalidStateTransition {
                from: tx.status,
                to: TransactionStatus::Created,
            });
        }
        if self.processors.contains_key(&tx.id) {
            return Err(EngineError::ProcessorAlreadyRunning(tx.id));
        }

        let Some(provider) = self.select_provider(&tx).await else {
            warn!(
                "No provider for {}/{} -> {}/{} ({}), failing transaction {}",
                tx.from_currency,
                tx.from_network,
                tx.to_currency,
                tx.to_network,
                tx.rate_type.as_str(),
                tx.id
            );
            self.fail_unrouted(&tx, None, StatusCode::RateNotFound).await?;
            return Ok(None);
        };

        let client = match self.registry.get(provider) {
            Ok(client) => client,
            Err(e) => {
                error!("Cannot dispatch transaction {}: {}", tx.id, e);
                self.fail_unrouted(&tx, Some(provider), StatusCode::UndefinedErrorCode)
                    .await?;
                return Ok(None);
            }
        };
        if tx.provider != Some(provider) {
            let assign = TransactionUpdate {
                provider: Some(provider),
                ..Default::default()
            };
            self.store.update(tx.id, &assign).await?;
        }

        self.spawn_processor(tx.id, self.processor(client))?;
        metrics::record_dispatched(provider);
        info!("Dispatched transaction {} to {}", tx.id, provider);
        Ok(Some(provider))
    }

    async fn fail_unrouted(
        &self,
        tx: &Transaction,
        provider: Option<ProviderKind>,
        code: StatusCode,
    ) -> EngineResult<()> {
        self.store
            .update(tx.id, &TransactionUpdate::failed(code, code.user_message()))
            .await?;
        metrics::record_transaction_failed(provider, code);
        Ok(())
    }

    async fn select_provider(&self, tx: &Transaction) -> Option<ProviderKind> {
        if let Some(provider) = tx.provider {
            return Some(provider);
        }

        match self.engine.selection {
            SelectionPolicy::Fixed => self
                .engine
                .default_provider
                .or_else(|| self.registry.priority().first().copied()),
            SelectionPolicy::BestRate => self
                .aggregator
                .get_best_rate(
                    tx.rate_type,
                    (&tx.from_currency, &tx.from_network),
                    (&tx.to_currency, &tx.to_network),
                )
                .await
                .map(|best| best.provider),
        }
    }

    fn spawn_processor(&self, id: Uuid, processor: Processor) -> EngineResult<()> {
        let slot = match self.processors.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::ProcessorAlreadyRunning(id)),
            Entry::Vacant(slot) => slot,
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let provider = processor.provider_kind();
        let task = tokio::spawn(async move {
            if let Err(e) = processor.run(id).await {
                error!("Processor for transaction {} stopped: {}", id, e);
            }
        });
        slot.insert(ProcessorHandle {
            generation,
            provider,
            started_at: Utc::now(),
            abort: task.abort_handle(),
        });

        let processors = self.processors.clone();
        supervise(PROCESSOR_TASK, format!("transaction {}", id), task, move || {
            processors.remove_if(&id, |_, handle| handle.generation == generation);
        });
        Ok(())
    }

    /// Claim a batch of NEW rows and dispatch them
    pub async fn intake_once(&self) -> EngineResult<usize> {
        let claimed = self.store.claim_new(self.engine.intake_batch_size).await?;
        if !claimed.is_empty() {
            debug!("Claimed {} new transactions", claimed.len());
        }

        let mut dispatched = 0;
        for tx in claimed {
            let id = tx.id;
            match self.add(tx).await {
                Ok(_) => dispatched += 1,
                Err(e) => error!("Failed to dispatch transaction {}: {}", id, e),
            }
        }
        Ok(dispatched)
    }

    pub async fn run_intake(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_millis(self.engine.intake_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Intake loop started (every {}ms, batches of {})",
            self.engine.intake_interval_ms, self.engine.intake_batch_size
        );

        loop {
            ticker.tick().await;
            if let Err(e) = self.intake_once().await {
                error!("Intake failed: {}", e);
            }
        }
    }

    /// Re-attach pollers to transactions an earlier process left mid-flight.
    /// Batch providers pick their rows up on the next sweep. Rows claimed
    /// but never created are reported, not re-created.
    pub async fn resume(&self) -> EngineResult<usize> {
        let mut resumed = 0;

        for tx in self.store.list_resumable().await? {
            let (Some(provider), Some(order_id)) = (tx.provider, tx.transaction_id.as_deref())
            else {
                warn!(
                    "Transaction {} left in {} without a provider order, needs operator attention",
                    tx.id, tx.status
                );
                continue;
            };

            let client = match self.registry.get(provider) {
                Ok(client) => client,
                Err(e) => {
                    warn!("Cannot resume transaction {}: {}", tx.id, e);
                    continue;
                }
            };
            if client.reconciliation() == Reconciliation::Batch {
                continue;
            }

            match self.spawn_processor(tx.id, self.processor(client)) {
                Ok(()) => {
                    debug!("Resumed polling {} order {} for transaction {}", provider, order_id, tx.id);
                    resumed += 1;
                }
                Err(e) => warn!("Cannot resume transaction {}: {}", tx.id, e),
            }
        }

        if resumed > 0 {
            info!("Resumed {} in-flight transactions", resumed);
        }
        Ok(resumed)
    }

    /// One sweeper per batch-reconciled provider
    pub fn start_sweepers(&self, configs: &[&ProviderConfig]) {
        for client in self.registry.batch_providers() {
            let kind = client.kind();
            if self.sweepers.contains_key(&kind) {
                continue;
            }
            let Some(config) = configs.iter().find(|c| c.kind == kind) else {
                warn!("No configuration for batch provider {}, sweeper not started", kind);
                continue;
            };

            let sweeper = BatchSweeper::new(
                self.processor(client),
                config.batch_size,
                Duration::from_secs(config.sweep_interval_secs),
            );
            let task = tokio::spawn(async move { sweeper.run().await });
            self.sweepers.insert(kind, task.abort_handle());
            supervise(SWEEPER_TASK, format!("{} sweeper", kind), task, || {});
        }
    }

    pub fn in_flight(&self) -> Vec<InFlight> {
        let mut running: Vec<InFlight> = self
            .processors
            .iter()
            .map(|entry| InFlight {
                transaction_id: *entry.key(),
                provider: entry.provider,
                started_at: entry.started_at,
            })
            .collect();
        running.sort_by_key(|r| r.started_at);
        running
    }

    /// Abort every processor and sweeper
    pub fn shutdown(&self) {
        let processors = self.processors.len();
        for entry in self.processors.iter() {
            entry.abort.abort();
        }
        for entry in self.sweepers.iter() {
            entry.value().abort();
        }
        self.sweepers.clear();
        info!("Dispatcher stopped ({} processors aborted)", processors);
    }
}

/// Watch a task to completion, surfacing panics, then run `on_exit`
fn supervise<F>(task_kind: &'static str, label: String, task: JoinHandle<()>, on_exit: F)
where
    F: FnOnce() + Send + 'static,
{
    metrics::record_task_started(task_kind);
    tokio::spawn(async move {
        let panicked = match task.await {
            Ok(()) => false,
            Err(e) if e.is_panic() => {
                error!("Task for {} panicked", label);
                true
            }
            Err(_) => {
                debug!("Task for {} cancelled", label);
                false
            }
        };
        on_exit();
        metrics::record_task_finished(task_kind, panicked);
    });
}
