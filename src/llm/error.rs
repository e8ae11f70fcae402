//! Error types for the reasoning client

use thiserror::Error;

/// Error type for reasoning service calls
///
/// Callers classify these by message (see `retry::is_rate_limit_failure`), so
/// the provider's error body is always kept in the message.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP client error, including timeouts
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code
        status_code: u16,
        /// Error message
        message: String,
    },

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Please retry after {retry_after_secs} seconds")]
    RateLimit {
        /// Seconds to wait before retrying
        retry_after_secs: u64,
    },

    /// Unexpected response format
    #[error("Unexpected response format: {0}")]
    UnexpectedResponse(String),
}
