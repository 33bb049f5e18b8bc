//! Transaction persistence
//!
//! Handles:
//! - Read-by-id and partial updates of transaction rows
//! - Atomic NEW -> HANDLED claims for intake
//! - Listing rows that still need reconciliation
//! - Restart recovery queries and status statistics

mod manager;

#[cfg(test)]
pub mod memory;

pub use manager::PgTransactionStore;

use crate::error::EngineResult;
use crate::providers::ProviderKind;
use crate::transaction::{Transaction, TransactionStatus, TransactionUpdate};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Statuses that never need reconciliation
pub const UNRECONCILED: [TransactionStatus; 4] = [
    TransactionStatus::New,
    TransactionStatus::Handled,
    TransactionStatus::Done,
    TransactionStatus::Error,
];

/// Row counts per canonical status
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransactionStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
}

/// Store contract. The schema and the creation path belong to the
/// surrounding platform; the engine only reads, patches and lists rows.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> EngineResult<Transaction>;

    /// Apply a partial update and return the fresh row. A provider
    /// transaction id is written only when none is stored yet.
    async fn update(&self, id: Uuid, update: &TransactionUpdate) -> EngineResult<Transaction>;

    /// Atomically move up to `limit` NEW rows to HANDLED and return them
    async fn claim_new(&self, limit: i64) -> EngineResult<Vec<Transaction>>;

    /// Post-creation, non-terminal rows assigned to `provider`
    async fn list_for_reconciliation(&self, provider: ProviderKind) -> EngineResult<Vec<Transaction>>;

    /// Rows an interrupted process may have left mid-flight
    async fn list_resumable(&self) -> EngineResult<Vec<Transaction>>;

    async fn stats(&self) -> EngineResult<TransactionStats>;

    async fn health_check(&self) -> EngineResult<()>;
}

/// Whether a row is due for a status lookup
pub fn needs_reconciliation(tx: &Transaction) -> bool {
    tx.transaction_id.is_some() && !UNRECONCILED.contains(&tx.status)
}
