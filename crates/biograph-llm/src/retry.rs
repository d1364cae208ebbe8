//! Exponential backoff for transient model failures.

use std::future::Future;
use std::time::Duration;

use crate::error::ModelError;

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(8);

/// Retries `RateLimited` and `Unavailable` failures up to `max_retries`
/// times after the first attempt. Other errors are returned immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self::with_delays(max_retries, BASE_DELAY, MAX_DELAY)
    }

    pub fn with_delays(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (0-based). A server hint wins when
    /// present, still capped at `max_delay`.
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let backoff = hint.unwrap_or_else(|| {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(retry.min(16)))
        });
        backoff.min(self.max_delay)
    }

    /// Run `attempt` until it succeeds, fails permanently, or the retry
    /// budget is spent. On exhaustion the last error is returned; a rate
    /// limit is reported as `Unavailable`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries < self.max_retries => {
                    let delay = self.delay_for(retries, e.retry_after());
                    retries += 1;
                    tracing::warn!(
                        operation,
                        attempt = retries,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Model request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if retries > 0 {
                        tracing::error!(operation, retries, error = %e, "Model request failed");
                    }
                    return Err(match e {
                        ModelError::RateLimited { message, .. } => {
                            ModelError::Unavailable(format!("retries exhausted: {message}"))
                        }
                        other => other,
                    });
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}
