//! Exchange provider clients
//!
//! This module provides:
//! - The `ProviderClient` contract every external exchange implements
//! - One shared retry/timeout policy for all outbound calls
//! - Request signing (HMAC and Ed25519) kept inside the clients
//! - A registry holding one client per configured provider

pub mod changelly;
pub mod easybit;
pub mod fixedfloat;
pub mod http;
pub mod retry;
pub mod signing;

#[cfg(test)]
pub mod testing;

pub use retry::{RetryOn, RetryPolicy};

use crate::config::Settings;
use crate::error::{EngineError, EngineResult, ProviderResult};
use crate::transaction::{
    Direction, EmergencyChoice, Leg, RateType, Received, TransactionStatus,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// External exchange counterparties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    FixedFloat,
    Changelly,
    Easybit,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::FixedFloat => "fixedfloat",
            ProviderKind::Changelly => "changelly",
            ProviderKind::Easybit => "easybit",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixedfloat" => Ok(ProviderKind::FixedFloat),
            "changelly" => Ok(ProviderKind::Changelly),
            "easybit" => Ok(ProviderKind::Easybit),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// How a provider's orders are reconciled after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// One poller task per transaction
    Polling,
    /// One sweeper task per provider, batched status lookups
    Batch,
}

/// Currency as listed by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCurrency {
    pub code: String,
    pub network: String,
    pub name: String,
    pub tag_name: Option<String>,
    pub can_send: bool,
    pub can_receive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub rate_type: RateType,
    pub direction: Direction,
    pub from_code: String,
    pub from_network: String,
    pub to_code: String,
    pub to_network: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderQuote {
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub network_fee: Option<Decimal>,
    pub min: Decimal,
    pub max: Decimal,
}

/// Order creation request in provider-native currency codes
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub rate_type: RateType,
    pub direction: Direction,
    pub from_code: String,
    pub from_network: String,
    pub to_code: String,
    pub to_network: String,
    pub amount: Decimal,
    pub to_address: String,
    pub to_tag: Option<String>,
    pub refund_address: Option<String>,
    pub refund_tag: Option<String>,
}

/// Provider-side order handle
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRef {
    pub id: String,
    pub token: Option<String>,
}

/// Provider response to order creation or a status query. Ephemeral: the
/// engine copies what it needs into the transaction record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderOrder {
    pub id: String,
    pub token: Option<String>,
    pub native_status: String,
    pub from: Leg,
    pub to: Leg,
    pub back: Leg,
    pub registered_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub received_from: Received,
    pub received_to: Received,
    pub received_back: Received,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyRequest {
    pub order: OrderRef,
    pub choice: EmergencyChoice,
    pub address: Option<String>,
    pub tag: Option<String>,
}

/// Normalized operations against one external exchange
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn reconciliation(&self) -> Reconciliation;

    /// Map a native status through this provider's fixed table
    fn map_status(&self, native: &str) -> ProviderResult<TransactionStatus>;

    async fn currencies(&self) -> ProviderResult<Vec<ProviderCurrency>>;

    async fn currency(&self, code: &str, network: &str) -> ProviderResult<ProviderCurrency>;

    async fn quote(&self, request: &QuoteRequest) -> ProviderResult<ProviderQuote>;

    async fn create_order(&self, request: &OrderRequest) -> ProviderResult<ProviderOrder>;

    async fn order_status(&self, order: &OrderRef) -> ProviderResult<ProviderOrder>;

    /// Batched lookup; orders missing from the response are simply absent
    async fn order_statuses(&self, orders: &[OrderRef]) -> ProviderResult<Vec<ProviderOrder>>;

    async fn emergency(&self, request: &EmergencyRequest) -> ProviderResult<()>;
}

/// Status lookups one by one for providers without a batch endpoint.
/// Orders whose lookup fails are left out of the result.
pub(crate) async fn lookup_each<C>(client: &C, orders: &[OrderRef]) -> ProviderResult<Vec<ProviderOrder>>
where
    C: ProviderClient + ?Sized,
{
    let mut found = Vec::with_capacity(orders.len());
    for order in orders {
        match client.order_status(order).await {
            Ok(status) => found.push(status),
            Err(e) => warn!(
                provider = %client.kind(),
                order_id = %order.id,
                "Status lookup failed: {}",
                e
            ),
        }
    }
    Ok(found)
}

/// One client per configured provider, built once at process start
pub struct ProviderRegistry {
    clients: HashMap<ProviderKind, Arc<dyn ProviderClient>>,
    priority: Vec<ProviderKind>,
}

impl ProviderRegistry {
    /// Build clients for every enabled provider
    pub fn from_settings(settings: &Settings) -> EngineResult<Self> {
        let mut clients: Vec<Arc<dyn ProviderClient>> = Vec::new();

        for config in settings.enabled_providers() {
            let client: Arc<dyn ProviderClient> = match config.kind {
                ProviderKind::FixedFloat => Arc::new(fixedfloat::FixedFloatClient::new(config)?),
                ProviderKind::Changelly => Arc::new(changelly::ChangellyClient::new(config)?),
                ProviderKind::Easybit => Arc::new(easybit::EasybitClient::new(config)?),
            };
            info!(
                "Provider {} initialized (priority {}, {:?} reconciliation)",
                config.kind,
                config.priority,
                client.reconciliation()
            );
            clients.push(client);
        }

        Ok(Self::with_clients(clients))
    }

    /// Registry over explicit clients; iteration order is the given order
    pub fn with_clients(clients: Vec<Arc<dyn ProviderClient>>) -> Self {
        let priority = clients.iter().map(|c| c.kind()).collect();
        let clients = clients.into_iter().map(|c| (c.kind(), c)).collect();
        Self { clients, priority }
    }

    pub fn get(&self, kind: ProviderKind) -> EngineResult<Arc<dyn ProviderClient>> {
        self.clients
            .get(&kind)
            .cloned()
            .ok_or(EngineError::ProviderNotFound(kind))
    }

    /// Configured providers in priority order
    pub fn priority(&self) -> &[ProviderKind] {
        &self.priority
    }

    /// Providers reconciled by a per-provider sweeper
    pub fn batch_providers(&self) -> Vec<Arc<dyn ProviderClient>> {
        self.priority
            .iter()
            .filter_map(|kind| self.clients.get(kind))
            .filter(|c| c.reconciliation() == Reconciliation::Batch)
            .cloned()
            .collect()
    }
}
