//! Error types for analysis stages

use thiserror::Error;

use crate::llm::LlmError;
use crate::retry::{RetryError, RetryExhausted};

/// How a stage failure should be treated by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Still rate limited after every retry; recorded, never run-fatal
    RateLimitExhausted,
    /// Any other failure; the run reports the first of these
    Fatal,
}

/// Error type for a single stage run
#[derive(Debug, Error)]
pub enum StageError {
    /// The reasoning service failed with something other than a rate limit
    #[error("{0}")]
    Reasoning(LlmError),

    #[error(transparent)]
    Exhausted(#[from] RetryExhausted),

    /// The request payload could not be built from the document
    #[error("Could not build request payload: {0}")]
    Payload(String),
}

impl StageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::Exhausted(_) => FailureKind::RateLimitExhausted,
            StageError::Reasoning(_) | StageError::Payload(_) => FailureKind::Fatal,
        }
    }
}

impl From<RetryError<LlmError>> for StageError {
    fn from(err: RetryError<LlmError>) -> Self {
        match err {
            RetryError::Fatal(e) => StageError::Reasoning(e),
            RetryError::Exhausted(e) => StageError::Exhausted(e),
        }
    }
}
