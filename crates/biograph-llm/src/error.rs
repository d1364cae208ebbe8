//! Error taxonomy for model calls.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

/// Errors from model calls.
///
/// `RateLimited` and `Unavailable` are transient and retried by the
/// generator; `Authentication` and `InvalidPrompt` never are.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("Model authentication failed: {0}")]
    Authentication(String),

    #[error("Model rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Model rejected the prompt: {0}")]
    InvalidPrompt(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unavailable(_))
    }

    /// Server-provided hint for when to retry.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn timed_out(after: Duration) -> Self {
        Self::Unavailable(format!("no response within {after:?}"))
    }

    /// Classify a non-success HTTP response.
    pub(crate) fn from_status(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let message = format!("{status}: {}", error_message(body));
        match status.as_u16() {
            401 | 403 => Self::Authentication(message),
            429 => Self::RateLimited {
                message,
                retry_after: parse_retry_after(headers),
            },
            400 | 404 | 413 | 422 => Self::InvalidPrompt(message),
            _ => Self::Unavailable(message),
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Unavailable(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::Unavailable(format!("connection failed: {err}"))
        } else {
            Self::Unavailable(err.to_string())
        }
    }

    pub(crate) fn malformed(what: &str, err: impl std::fmt::Display) -> Self {
        Self::Unavailable(format!("malformed {what}: {err}"))
    }
}

/// Read the body of a failed response and classify it.
pub(crate) async fn error_for_response(response: reqwest::Response) -> ModelError {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    ModelError::from_status(status, &headers, &body)
}

/// Pull `error.message` out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    const MAX_LEN: usize = 300;

    let extracted = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            err.get("message")
                .and_then(|m| m.as_str())
                .or_else(|| err.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());

    if extracted.chars().count() > MAX_LEN {
        let truncated: String = extracted.chars().take(MAX_LEN).collect();
        format!("{truncated}...")
    } else {
        extracted
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs = raw.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
