//! Read-only view of the shared coin/rate cache
//!
//! An external loader populates four kinds of keys:
//! - `coins`: set of known coin symbols
//! - `coin:{COIN}:networks`: set of networks for one coin
//! - `coininfo:{provider}:{COIN}:{NETWORK}`: JSON `CoinInfo`
//! - `rate:{provider}:{rate_type}:{FROM}_{NET}:{TO}_{NET}`: JSON `RateQuote`
//!
//! The engine never writes these keys.

mod postgres;

#[cfg(test)]
pub mod memory;

pub use postgres::PgCacheBackend;

use crate::error::{EngineError, EngineResult};
use crate::providers::ProviderKind;
use crate::transaction::RateType;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Provider-specific metadata for one (coin, network)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinInfo {
    /// Code the provider uses for this coin/network pair
    pub provider_code: String,
    pub provider_network: String,
    pub name: String,
    #[serde(default)]
    pub tag_name: Option<String>,
    /// Users may send this coin to the provider
    pub can_send: bool,
    /// Users may receive this coin from the provider
    pub can_receive: bool,
}

/// Point-in-time quote written by the rate loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub from: String,
    pub to: String,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    #[serde(default)]
    pub network_fee: Option<Decimal>,
    pub min: Decimal,
    pub max: Decimal,
    pub provider: ProviderKind,
    pub updated_at: DateTime<Utc>,
}

impl RateQuote {
    /// Units of `to` per unit of `from`; `None` for a zero input amount
    pub fn effective_rate(&self) -> Option<Decimal> {
        self.amount_out.checked_div(self.amount_in)
    }
}

/// Raw key/value access to the cache store
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;

    async fn members(&self, key: &str) -> EngineResult<Vec<String>>;

    async fn health_check(&self) -> EngineResult<()> {
        Ok(())
    }
}

pub fn coins_key() -> String {
    "coins".to_string()
}

pub fn networks_key(coin: &str) -> String {
    format!("coin:{}:networks", coin.to_uppercase())
}

pub fn coin_info_key(provider: ProviderKind, coin: &str, network: &str) -> String {
    format!(
        "coininfo:{}:{}:{}",
        provider,
        coin.to_uppercase(),
        network.to_uppercase()
    )
}

pub fn rate_key(
    provider: ProviderKind,
    rate_type: RateType,
    from: (&str, &str),
    to: (&str, &str),
) -> String {
    format!(
        "rate:{}:{}:{}_{}:{}_{}",
        provider,
        rate_type.as_str(),
        from.0.to_uppercase(),
        from.1.to_uppercase(),
        to.0.to_uppercase(),
        to.1.to_uppercase()
    )
}

/// Typed reader over a `CacheBackend`
#[derive(Clone)]
pub struct RateCache {
    backend: Arc<dyn CacheBackend>,
    max_rate_age: Duration,
}

impl RateCache {
    pub fn new(backend: Arc<dyn CacheBackend>, max_rate_age_secs: i64) -> Self {
        Self {
            backend,
            max_rate_age: Duration::seconds(max_rate_age_secs),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        match self.backend.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| EngineError::Cache(format!("undecodable value at {}: {}", key, e))),
            None => Ok(None),
        }
    }

    pub async fn coins(&self) -> EngineResult<Vec<String>> {
        self.backend.members(&coins_key()).await
    }

    pub async fn networks(&self, coin: &str) -> EngineResult<Vec<String>> {
        self.backend.members(&networks_key(coin)).await
    }

    pub async fn get_coin_info(
        &self,
        provider: ProviderKind,
        coin: &str,
        network: &str,
    ) -> EngineResult<Option<CoinInfo>> {
        self.get_json(&coin_info_key(provider, coin, network)).await
    }

    /// Quote for one provider, or `None` if absent or older than the
    /// configured maximum age
    pub async fn get_rate(
        &self,
        provider: ProviderKind,
        rate_type: RateType,
        from: (&str, &str),
        to: (&str, &str),
    ) -> EngineResult<Option<RateQuote>> {
        let key = rate_key(provider, rate_type, from, to);
        let quote: Option<RateQuote> = self.get_json(&key).await?;

        Ok(quote.filter(|q| {
            let age = Utc::now().signed_duration_since(q.updated_at);
            let fresh = age <= self.max_rate_age;
            if !fresh {
                debug!(%provider, key = %key, age_secs = age.num_seconds(), "Ignoring stale rate");
            }
            fresh
        }))
    }

    pub async fn health_check(&self) -> EngineResult<()> {
        self.backend.health_check().await
    }
}
