//! Collaborators and settings shared by every stage of one run

use std::path::PathBuf;

use tracing::{error, warn};

use crate::analysis::{StageError, StageOutcome};
use crate::document::{AnalysisResult, SeoDocument, StageName};
use crate::llm::{CompletionRequest, ImagePayload, LlmError, ReasoningClient};
use crate::retry::{Pacer, RetryPolicy, run_with_retry};
use crate::storage::Storage;

/// Everything a stage needs besides the document itself
///
/// Stages receive only the retry and pacing settings, never the whole
/// analyzer configuration.
pub struct StageContext<'a, R, S> {
    pub client: &'a R,
    pub storage: &'a S,
    pub retry: RetryPolicy,
    pub pacer: Pacer,
    /// File name the document is persisted under
    pub document_file: &'a str,
}

impl<'a, R, S> StageContext<'a, R, S>
where
    R: ReasoningClient,
    S: Storage,
{
    pub fn new(
        client: &'a R,
        storage: &'a S,
        retry: RetryPolicy,
        pacer: Pacer,
        document_file: &'a str,
    ) -> Self {
        Self {
            client,
            storage,
            retry,
            pacer,
            document_file,
        }
    }

    /// Append to the error log; a failing log write is only traced
    pub async fn log(&self, stage: StageName, message: &str) {
        if let Err(e) = self.storage.append_log(stage.label(), message).await {
            warn!("Could not append to error log: {}", e);
        }
    }

    /// Pacing delay before a distinct reasoning request
    pub async fn pace(&self, stage: StageName) {
        if !self.pacer.delay().is_zero() {
            self.log(
                stage,
                &format!(
                    "Waiting {} seconds before next API call to prevent rate limiting",
                    self.pacer.delay().as_secs()
                ),
            )
            .await;
        }
        self.pacer.wait().await;
    }

    /// Text completion under the retry policy
    pub async fn complete(
        &self,
        stage: StageName,
        request: &CompletionRequest,
    ) -> Result<String, StageError> {
        self.with_retry(stage, || self.client.complete(request)).await
    }

    /// Vision completion under the retry policy
    pub async fn complete_with_image(
        &self,
        stage: StageName,
        request: &CompletionRequest,
        image: &ImagePayload,
    ) -> Result<String, StageError> {
        self.with_retry(stage, || self.client.complete_with_image(request, image))
            .await
    }

    async fn with_retry<F, Fut>(&self, stage: StageName, call: F) -> Result<String, StageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String, LlmError>>,
    {
        let max_attempts = self.retry.max_attempts;
        let call = &call;
        let result = run_with_retry(&self.retry, |attempt| async move {
            if attempt > 0 {
                self.log(
                    stage,
                    &format!("Rate limit hit, retrying (retry {attempt}/{max_attempts})"),
                )
                .await;
            }
            call().await
        })
        .await;
        Ok(result?)
    }

    /// Write the whole document; a failure is logged and yields `None`
    pub async fn persist(&self, stage: StageName, document: &SeoDocument) -> Option<PathBuf> {
        match self.storage.write_document(self.document_file, document).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to persist document after {} stage: {}", stage, e);
                self.log(stage, &format!("Failed to persist document: {e}")).await;
                None
            }
        }
    }

    /// Record the stage's result (or its error entry), persist and build the outcome
    pub async fn settle(
        &self,
        document: &mut SeoDocument,
        stage: StageName,
        result: Result<AnalysisResult, StageError>,
    ) -> StageOutcome {
        self.settle_persisted(document, stage, result).await.0
    }

    /// Like [`settle`](Self::settle), also returning where the document went
    pub async fn settle_persisted(
        &self,
        document: &mut SeoDocument,
        stage: StageName,
        result: Result<AnalysisResult, StageError>,
    ) -> (StageOutcome, Option<PathBuf>) {
        match result {
            Ok(result) => {
                let text = match &result {
                    AnalysisResult::Completed(output) => output.to_text(),
                    AnalysisResult::Failed(failure) => failure.error.clone(),
                };
                document.record(stage, result);
                let persisted_path = self.persist(stage, document).await;
                let outcome = StageOutcome::Success {
                    text,
                    persisted_path: persisted_path.clone(),
                };
                (outcome, persisted_path)
            }
            Err(e) => {
                let message = e.to_string();
                error!("{} stage failed: {}", stage, message);
                self.log(stage, &message).await;
                document.record(stage, AnalysisResult::failed(&message));
                let persisted_path = self.persist(stage, document).await;
                let outcome = StageOutcome::Failure {
                    message,
                    kind: e.kind(),
                };
                (outcome, persisted_path)
            }
        }
    }
}
