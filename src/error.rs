//! Error types for the swap broker

use crate::providers::ProviderKind;
use crate::transaction::TransactionStatus;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by an exchange provider client.
///
/// The domain variants (`InvalidAddress`, `OutOfLimits`, `PartnerInternal`)
/// come from each provider's fixed error table. Payloads missing from that
/// table surface as `Api` so they are never silently dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    /// A single rate-limit signal from the remote side
    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("Failed to decode provider response: {0}")]
    DataDecode(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Amount out of limits: {0}")]
    OutOfLimits(String),

    #[error("Partner internal error: {0}")]
    PartnerInternal(String),

    #[error("Unknown provider status: {0}")]
    UnknownProviderStatus(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Provider error {code}: {message}")]
    Api { code: String, message: String },
}

impl ProviderError {
    /// Transient failures that may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_)
                | ProviderError::Timeout { .. }
                | ProviderError::RateLimited
                | ProviderError::RateLimitExceeded { .. }
        )
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Network(_) => "network",
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ProviderError::DataDecode(_) => "decode",
            ProviderError::InvalidAddress(_) => "invalid_address",
            ProviderError::OutOfLimits(_) => "out_of_limits",
            ProviderError::PartnerInternal(_) => "partner_internal",
            ProviderError::UnknownProviderStatus(_) => "unknown_status",
            ProviderError::Unsupported(_) => "unsupported",
            ProviderError::Api { .. } => "api",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout {
                operation: e
                    .url()
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|| "request".to_string()),
            }
        } else if e.is_decode() {
            ProviderError::DataDecode(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::DataDecode(e.to_string())
    }
}

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Main error type for the orchestration engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("No coin info for {coin}/{network} on {provider}")]
    CoinInfoMissing {
        provider: ProviderKind,
        coin: String,
        network: String,
    },

    #[error("Provider {0} is not configured")]
    ProviderNotFound(ProviderKind),

    #[error("Transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Processor already running for transaction {0}")]
    ProcessorAlreadyRunning(Uuid),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Check if error is retryable on a later cycle
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Store(_) | EngineError::Cache(_) => true,
            EngineError::Provider(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Timeout {
            operation: "order".to_string()
        }
        .is_retryable());
        assert!(!ProviderError::InvalidAddress("bc1".to_string()).is_retryable());
        assert!(!ProviderError::DataDecode("eof".to_string()).is_retryable());

        let engine: EngineError = ProviderError::Network("reset".to_string()).into();
        assert!(engine.is_retryable());
        assert!(!EngineError::TransactionNotFound(Uuid::nil()).is_retryable());
    }

    #[test]
    fn test_timeout_distinct_from_rate_limit() {
        let timeout = ProviderError::Timeout {
            operation: "create".to_string(),
        };
        assert_ne!(timeout.kind(), ProviderError::RateLimited.kind());
        assert_ne!(
            timeout.kind(),
            ProviderError::DataDecode(String::new()).kind()
        );
    }
}
