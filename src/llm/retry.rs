//! Retry policy with exponential backoff for LLM requests
//!
//! Backoff doubles per attempt with jitter, capped at a maximum delay.
//! Rate-limit errors honor the provider's `Retry-After` hint instead of
//! the computed backoff. Non-retryable errors surface immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use super::error::LlmError;

/// Retry policy for transient LLM failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts (first try included)
    pub max_attempts: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Ceiling on any single backoff
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that never retries (tests and dry runs)
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Execute an operation, retrying retryable errors with backoff
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if !err.is_retryable() || attempt >= self.max_attempts {
                        return Err(err);
                    }

                    // Rate limits dictate their own delay
                    let delay = err.retry_after().unwrap_or_else(|| self.backoff(attempt - 1));
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        error = %err,
                        "Retrying LLM request"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Exponential backoff with up to 20% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = (self.initial_backoff.as_millis() as u64)
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_backoff.as_millis() as u64);

        let jitter = if base_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=base_ms / 5)
        };
        Duration::from_millis(base_ms + jitter)
    }
}
