//! Configuration management for the swap broker
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::providers::ProviderKind;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub instance_id: String,
    pub intake_interval_ms: u64,
    pub intake_batch_size: i64,
    pub selection: SelectionPolicy,
    pub default_provider: Option<ProviderKind>,
    pub health_check_interval_secs: u64,
}

/// How the dispatcher picks a provider for an unassigned transaction
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    Fixed,
    BestRate,
}

/// Per-transaction polling cadence (reconciliation strategy A)
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    pub poll_interval_ms: u64,
    pub expired_poll_interval_ms: u64,
    pub escalate_after_expired: u32,
    pub max_expired_checks: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            expired_poll_interval_ms: 60_000,
            escalate_after_expired: 3,
            max_expired_checks: 30,
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn expired_poll_interval(&self) -> Duration {
        Duration::from_millis(self.expired_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    #[serde(default)]
    pub bootstrap_schema: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub max_rate_age_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_rate_age_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub enabled: bool,
    /// Lower values are consulted first and win rate ties
    pub priority: u32,
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_batch_size() -> usize {
    10
}

fn default_sweep_interval() -> u64 {
    30
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_BROKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse and validate a TOML document
    pub fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_providers().is_empty() {
            anyhow::bail!("At least one provider must be enabled");
        }

        for (name, provider) in &self.providers {
            if !provider.enabled {
                continue;
            }
            if provider.base_url.is_empty() {
                anyhow::bail!("Provider {} has no base URL configured", name);
            }
            if provider.batch_size == 0 {
                anyhow::bail!("Provider {} batch_size must be at least 1", name);
            }
            if provider.max_retries == 0 {
                anyhow::bail!("Provider {} max_retries must be at least 1", name);
            }
            if provider.api_key.is_empty() {
                tracing::warn!("Provider {} has no API key - requests will be rejected", name);
            }
        }

        if self.engine.selection == SelectionPolicy::Fixed {
            let default = self
                .engine
                .default_provider
                .context("engine.default_provider is required for fixed selection")?;
            if !self.provider_priority().contains(&default) {
                anyhow::bail!("Default provider {} is not enabled", default);
            }
        }

        Ok(())
    }

    /// Enabled providers in priority order
    pub fn enabled_providers(&self) -> Vec<&ProviderConfig> {
        let mut providers: Vec<_> = self.providers.values().filter(|p| p.enabled).collect();
        providers.sort_by_key(|p| (p.priority, p.kind.as_str()));
        providers
    }

    /// Provider kinds in the order the aggregator iterates them
    pub fn provider_priority(&self) -> Vec<ProviderKind> {
        self.enabled_providers().iter().map(|p| p.kind).collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
