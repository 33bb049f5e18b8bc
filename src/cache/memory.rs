//! In-process cache backend for tests

use super::{coin_info_key, CacheBackend, CoinInfo};
use crate::error::EngineResult;
use crate::providers::ProviderKind;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

#[derive(Default)]
pub struct MemoryCacheBackend {
    values: DashMap<String, String>,
    sets: DashMap<String, Vec<String>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) {
        let raw = serde_json::to_string(value).expect("serializable test value");
        self.put(key, &raw);
    }

    /// Coin info usable on both sides of a swap
    pub fn put_coin(&self, provider: ProviderKind, coin: &str, network: &str, provider_code: &str) {
        let info = CoinInfo {
            provider_code: provider_code.to_string(),
            provider_network: network.to_string(),
            name: coin.to_string(),
            tag_name: None,
            can_send: true,
            can_receive: true,
        };
        self.put_json(&coin_info_key(provider, coin, network), &info);
    }

    pub fn add_member(&self, key: &str, member: &str) {
        let mut set = self.sets.entry(key.to_string()).or_default();
        if !set.iter().any(|m| m == member) {
            set.push(member.to_string());
            set.sort();
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn members(&self, key: &str) -> EngineResult<Vec<String>> {
        Ok(self.sets.get(key).map(|s| s.value().clone()).unwrap_or_default())
    }
}
