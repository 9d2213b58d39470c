//! LLM error taxonomy
//!
//! Transient and rate-limit errors are retried by the service wrapper;
//! auth failures are fatal; quota exhaustion escalates to the
//! coordinator; malformed content is surfaced to the caller that
//! requested structured output.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Transient provider error {status}: {message}")]
    Transient { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),
}

impl LlmError {
    /// Check if this is a rate limit error
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::Transient { status, .. } => *status >= 500 || *status == 429,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::AuthFailure(_) => false,
            LlmError::QuotaExhausted(_) => false,
            LlmError::Malformed(_) => false,
            LlmError::Json(_) => false,
        }
    }

    /// Get the mandated delay if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Classify an HTTP status + body into the taxonomy
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => LlmError::AuthFailure(message),
            402 => LlmError::QuotaExhausted(message),
            429 => LlmError::RateLimited {
                retry_after: retry_after.unwrap_or(Duration::from_secs(60)),
            },
            _ => LlmError::Transient { status, message },
        }
    }
}
