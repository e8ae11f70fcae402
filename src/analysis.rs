//! # Analysis Stages
//!
//! The five independent steps that each read the scraped fields of the
//! document, ask the reasoning service for one analysis and write exactly one
//! named result slot back. All of them share the same skeleton:
//!
//! 1. wait the pacing delay
//! 2. build the request from fields already in the document
//! 3. call the service, retrying rate-limit failures with backoff
//! 4. record the result, or an `error` entry, and persist the whole document
//!
//! Content, keyword, backlink and url are plain text stages (`AnalysisStage`).
//! The image stage (`ImageStage`) additionally sends up to two images to a
//! vision model before its aggregate request.

mod context;
mod error;
mod image;
pub mod prompts;
mod stage;

pub use context::StageContext;
pub use error::{FailureKind, StageError};
pub use image::{
    DESCRIPTION_MAX_TOKENS, DESCRIPTION_PLACEHOLDER, IMAGE_MAX_TOKENS, ImageStage,
    MAX_VISION_IMAGES, select_vision_images,
};
pub use stage::{AnalysisStage, STAGE_MAX_TOKENS};

use std::path::PathBuf;

/// What one stage run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success {
        text: String,
        /// `None` when the result is in memory but could not be written
        persisted_path: Option<PathBuf>,
    },
    Failure {
        message: String,
        kind: FailureKind,
    },
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success { .. })
    }

    /// True for failures that should end the run with an error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StageOutcome::Failure {
                kind: FailureKind::Fatal,
                ..
            }
        )
    }
}
