//! Batch reconciliation for providers with a multi-order status endpoint

use super::Processor;
use crate::error::EngineResult;
use crate::metrics;
use crate::providers::OrderRef;

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Long-lived loop reconciling every open transaction of one provider
pub struct BatchSweeper {
    processor: Processor,
    batch_size: usize,
    every: Duration,
}

impl BatchSweeper {
    pub fn new(processor: Processor, batch_size: usize, every: Duration) -> Self {
        Self {
            processor,
            batch_size: batch_size.max(1),
            every,
        }
    }

    pub async fn run(&self) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Batch sweeper started for {} (every {:?}, batches of {})",
            self.processor.provider_kind(),
            self.every,
            self.batch_size
        );

        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(applied) if applied > 0 => {
                    debug!("{} sweep applied {} observations", self.processor.provider_kind(), applied)
                }
                Ok(_) => {}
                Err(e) => error!("{} sweep failed: {}", self.processor.provider_kind(), e),
            }
        }
    }

    /// One pass over all open transactions. Returns how many provider
    /// observations were applied.
    pub async fn sweep(&self) -> EngineResult<usize> {
        let provider = self.processor.provider_kind();
        let open = self
            .processor
            .store
            .list_for_reconciliation(provider)
            .await?;
        let mut applied = 0;

        for chunk in open.chunks(self.batch_size) {
            let orders: Vec<OrderRef> = chunk
                .iter()
                .filter_map(|tx| {
                    tx.transaction_id.clone().map(|id| OrderRef {
                        id,
                        token: tx.transaction_token.clone(),
                    })
                })
                .collect();

            metrics::record_sweep_batch(provider);
            let found = match self.processor.provider.order_statuses(&orders).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(%provider, "Batch status lookup of {} orders failed: {}", orders.len(), e);
                    continue;
                }
            };

            for order in found {
                let Some(tx) = chunk
                    .iter()
                    .find(|tx| tx.transaction_id.as_deref() == Some(order.id.as_str()))
                else {
                    debug!(%provider, "Ignoring unrequested order {}", order.id);
                    continue;
                };

                match self.processor.reconcile(tx.id, &order).await {
                    Ok(_) => applied += 1,
                    Err(e) => warn!(%provider, "Reconcile failed for transaction {}: {}", tx.id, e),
                }
            }
        }

        Ok(applied)
    }
}
