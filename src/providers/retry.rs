//! Retry and timeout policy shared by every provider client

use super::ProviderKind;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Which failures earn another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    /// Only an explicit rate-limit signal. Used for non-idempotent calls.
    RateLimit,
    /// Rate limits plus network failures and timeouts. Used for reads.
    Transient,
}

impl RetryOn {
    fn should_retry(&self, error: &ProviderError) -> bool {
        match self {
            RetryOn::RateLimit => matches!(error, ProviderError::RateLimited),
            RetryOn::Transient => matches!(
                error,
                ProviderError::RateLimited
                    | ProviderError::Network(_)
                    | ProviderError::Timeout { .. }
            ),
        }
    }
}

/// Bounded attempts with doubling delay and a per-attempt timeout
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    provider: ProviderKind,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    pub fn new(
        provider: ProviderKind,
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            timeout,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.kind,
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// the attempt ceiling is reached.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        retry_on: RetryOn,
        mut call: F,
    ) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    operation: format!("{} {}", self.provider, operation),
                }),
            };

            crate::metrics::record_provider_request(self.provider, operation, result.as_ref().err());

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            provider = %self.provider,
                            operation,
                            attempt,
                            "Provider call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !retry_on.should_retry(&error) {
                return Err(error);
            }

            if attempt >= self.max_attempts {
                return Err(match error {
                    ProviderError::RateLimited => ProviderError::RateLimitExceeded { attempts: attempt },
                    other => other,
                });
            }

            if error == ProviderError::RateLimited {
                crate::metrics::record_rate_limit_retry(self.provider);
            }

            let delay = self.delay_for(attempt);
            warn!(
                provider = %self.provider,
                operation,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Retrying provider call: {}",
                error
            );
            sleep(delay).await;
        }
    }
}
