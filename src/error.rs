//! Error types for the seolens crate

use thiserror::Error;

use crate::document::StageName;
use crate::fetcher::FetchError;

/// Result type for seolens operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for seolens operations
#[derive(Debug, Error)]
pub enum Error {
    /// The page could not be scraped; nothing downstream can run
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A stage failed with a non-rate-limit error; the first one ends the run
    #[error("{stage} stage failed: {message}")]
    StageFailed { stage: StageName, message: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid target URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
