//! In-memory transaction store and fixtures for tests

use super::{needs_reconciliation, TransactionStats, TransactionStore};
use crate::error::{EngineError, EngineResult};
use crate::providers::ProviderKind;
use crate::transaction::{
    Direction, EmergencyChoice, Leg, RateType, Received, Transaction, TransactionStatus,
    TransactionUpdate,
};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

/// HANDLED BTC -> USDT(ERC20) fixed-rate swap of 0.01 BTC
pub fn sample_transaction() -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        status: TransactionStatus::Handled,
        status_code: None,
        status_message: None,
        provider: None,
        rate_type: RateType::Fixed,
        direction: Direction::From,
        from_currency: "BTC".to_string(),
        from_network: "BTC".to_string(),
        to_currency: "USDT".to_string(),
        to_network: "ERC20".to_string(),
        amount: dec!(0.01),
        to_address: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_string(),
        to_tag: None,
        refund_address: Some("bc1qrefund".to_string()),
        refund_tag: None,
        final_from: Leg::default(),
        final_to: Leg::default(),
        final_back: Leg::default(),
        transaction_id: None,
        transaction_token: None,
        registered_at: None,
        expires_at: None,
        received_from: Received::default(),
        received_to: Received::default(),
        received_back: Received::default(),
        emergency_choice: EmergencyChoice::None,
        emergency_address: None,
        emergency_tag: None,
        is_emergency_handled: false,
        made_emergency_action: false,
        is_status_shown: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Sample already created at `provider` with order id `order_id`
pub fn created_transaction(provider: ProviderKind, order_id: &str) -> Transaction {
    Transaction {
        status: TransactionStatus::Created,
        provider: Some(provider),
        transaction_id: Some(order_id.to_string()),
        ..sample_transaction()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rows: DashMap<Uuid, Transaction>,
    writes: AtomicUsize,
    fail_updates: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tx: Transaction) -> Uuid {
        let id = tx.id;
        self.rows.insert(id, tx);
        id
    }

    pub fn snapshot(&self, id: Uuid) -> Transaction {
        self.rows.get(&id).expect("transaction present").value().clone()
    }

    /// Simulate an operator or user writing onto the row
    pub fn edit(&self, id: Uuid, f: impl FnOnce(&mut Transaction)) {
        let mut row = self.rows.get_mut(&id).expect("transaction present");
        f(&mut row);
    }

    /// Number of successful `update` calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn get(&self, id: Uuid) -> EngineResult<Transaction> {
        self.rows
            .get(&id)
            .map(|row| row.value().clone())
            .ok_or(EngineError::TransactionNotFound(id))
    }

    async fn update(&self, id: Uuid, update: &TransactionUpdate) -> EngineResult<Transaction> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(EngineError::Store(sqlx::Error::PoolTimedOut));
        }

        let mut row = self
            .rows
            .get_mut(&id)
            .ok_or(EngineError::TransactionNotFound(id))?;

        let mut update = update.clone();
        if row.transaction_id.is_some() {
            update.transaction_id = None;
        }
        row.apply(&update);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(row.value().clone())
    }

    async fn claim_new(&self, limit: i64) -> EngineResult<Vec<Transaction>> {
        let mut claimed = Vec::new();
        for mut row in self.rows.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if row.status == TransactionStatus::New {
                row.apply(&TransactionUpdate::status(TransactionStatus::Handled));
                claimed.push(row.value().clone());
            }
        }
        Ok(claimed)
    }

    async fn list_for_reconciliation(&self, provider: ProviderKind) -> EngineResult<Vec<Transaction>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.provider == Some(provider) && needs_reconciliation(row.value()))
            .map(|row| row.value().clone())
            .collect())
    }

    async fn list_resumable(&self) -> EngineResult<Vec<Transaction>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| {
                !matches!(
                    row.status,
                    TransactionStatus::New | TransactionStatus::Done | TransactionStatus::Error
                )
            })
            .map(|row| row.value().clone())
            .collect())
    }

    async fn stats(&self) -> EngineResult<TransactionStats> {
        let mut stats = TransactionStats::default();
        for row in self.rows.iter() {
            stats.total += 1;
            *stats
                .by_status
                .entry(row.status.as_str().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn health_check(&self) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_rearms_notification_flag() {
        let store = MemoryStore::new();
        let new = store.insert(Transaction {
            status: TransactionStatus::New,
            ..sample_transaction()
        });
        let handled = store.insert(sample_transaction());

        let claimed = store.claim_new(10).await.unwrap();

        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, new);
        let row = store.snapshot(new);
        assert_eq!(row.status, TransactionStatus::Handled);
        assert!(!row.is_status_shown);
        assert!(store.snapshot(handled).is_status_shown);
    }
}
