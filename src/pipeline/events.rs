//! Events emitted by the orchestrator during a run.

use std::path::PathBuf;

use crate::analysis::StageOutcome;
use crate::document::StageName;

/// Progress of one analysis run
///
/// Callers can listen on the channel and react accordingly (e.g. drive a
/// spinner). Sending never blocks the pipeline; a dropped receiver is ignored.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The page is being scraped
    FetchStarted { url: String },

    /// The page was scraped
    FetchCompleted { paragraphs: usize, images: usize },

    /// A stage is about to start (including its pacing delay)
    StageStarted { stage: StageName },

    /// A stage finished, successfully or not
    StageFinished {
        stage: StageName,
        outcome: StageOutcome,
    },

    /// The document was written after a phase
    Persisted { path: PathBuf },

    /// The final report was written
    ReportWritten { path: PathBuf },
}
