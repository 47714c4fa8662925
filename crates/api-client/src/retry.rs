//! Bounded exponential-backoff retry
//!
//! Attempts run strictly one after another. After a failure the classified
//! error decides: non-retryable errors (401, 4xx) return immediately,
//! retryable ones (network, 429, 5xx) wait `base_delay * 2^attempt` and try
//! again until `max_retries` retries are spent. No jitter.
//!
//! 429 uses the same fixed backoff as 5xx; `Retry-After` is not consulted.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};
use transport::ClassifiedError;

/// Retry behavior for API calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each subsequent one.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt + 1` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `attempt` until it succeeds, fails non-retryably, or retries run out.
    ///
    /// The closure receives the 0-indexed attempt number. The last classified
    /// error is returned when retries are exhausted.
    pub async fn run<T, F, Fut>(
        &self,
        request_id: &str,
        mut attempt: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let mut current = 0u32;
        loop {
            let err = match attempt(current).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.retryable {
                debug!(request_id, kind = %err.kind, "not retryable");
                return Err(err);
            }

            if current >= self.config.max_retries {
                warn!(
                    request_id,
                    kind = %err.kind,
                    attempts = current + 1,
                    "retries exhausted"
                );
                return Err(err);
            }

            let delay = self.config.delay_for_attempt(current);
            metrics::counter!("api_client_retries_total", "kind" => err.kind.label()).increment(1);
            debug!(
                request_id,
                kind = %err.kind,
                attempt = current + 1,
                max = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
            current += 1;
        }
    }
}
