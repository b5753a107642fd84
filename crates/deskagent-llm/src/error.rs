use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("context length exceeded: {0}")]
    ContextLength(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, LlmError>;

impl LlmError {
    /// Whether the buffered path should back off and retry.
    ///
    /// Network failures, timeouts, 429 and 5xx are transient; everything
    /// else (cancellation, context length, quota, other 4xx, bad bodies)
    /// terminates the attempt loop immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) | LlmError::Timeout(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

const CONTEXT_PHRASES: [&str; 3] = ["maximum context", "token limit", "too many tokens"];

/// Substring classifier for provider error text signalling a blown context
/// window.
pub fn is_context_length_message(text: &str) -> bool {
    let lower = text.to_lowercase();

    if lower.contains("context") && lower.contains("length") {
        return true;
    }

    CONTEXT_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Provider-specific quota exhaustion: a 402, or a 429 whose payload talks
/// about quota rather than rate.
pub fn is_quota_message(status: u16, text: &str) -> bool {
    if status == 402 {
        return true;
    }

    if status == 429 {
        let lower = text.to_lowercase();
        return lower.contains("quota") || lower.contains("insufficient");
    }

    false
}

/// Map a raw HTTP error status + body into the right [`LlmError`] variant.
pub fn classify_api_error(status: u16, body: &str) -> LlmError {
    if is_quota_message(status, body) {
        return LlmError::QuotaExceeded(body.to_string());
    }

    if is_context_length_message(body) {
        return LlmError::ContextLength(body.to_string());
    }

    LlmError::Api {
        status,
        message: body.to_string(),
    }
}
