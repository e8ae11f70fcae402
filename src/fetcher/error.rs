//! Error types for the fetcher module

use thiserror::Error;

/// Error type for fetcher operations
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTML parsing error
    #[error("HTML parsing error: {0}")]
    HtmlParse(String),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Writing a downloaded image failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Target URL is unusable
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
