//! # Pipeline Orchestrator
//!
//! Runs one analysis: fetch once, then the five analysis stages strictly one
//! after another, then the aggregator. Every reasoning request goes through
//! the same client, so stages are never run concurrently; the pacing delay
//! before each request is what keeps the shared service under its limits.
//!
//! Failure policy:
//! - a fetch failure ends the run immediately, nothing is analysed
//! - a stage that runs out of rate-limit retries records its error and the
//!   run continues as a success
//! - any other stage failure is recorded too and later stages still run, but
//!   the first such failure becomes the run's error

mod events;

pub use events::PipelineEvent;

use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, instrument, warn};

use crate::analysis::{AnalysisStage, ImageStage, StageContext, StageOutcome};
use crate::config::{AnalyzerConfig, StageModels};
use crate::document::{OutputNames, SeoDocument, StageName};
use crate::error::Error;
use crate::fetcher::Fetcher;
use crate::llm::ReasoningClient;
use crate::report::Aggregator;
use crate::retry::{Pacer, RetryPolicy};
use crate::storage::Storage;

/// Tag used in the error log for failures outside any stage
const PIPELINE_LOG_TAG: &str = "pipeline";

/// Everything a run produced, kept in memory whether or not it was persisted
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub document: SeoDocument,
    /// Outcome of every stage, the report last, in execution order
    pub stages: Vec<(StageName, StageOutcome)>,
    pub analysis_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

/// Overall result of a run
#[derive(Debug)]
pub enum PipelineOutcome {
    Succeeded(PipelineRun),
    Failed {
        error: Error,
        /// Present when the failure happened after the fetch
        run: Option<PipelineRun>,
    },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Succeeded(_))
    }

    pub fn run(&self) -> Option<&PipelineRun> {
        match self {
            PipelineOutcome::Succeeded(run) => Some(run),
            PipelineOutcome::Failed { run, .. } => run.as_ref(),
        }
    }

    pub fn into_result(self) -> crate::error::Result<PipelineRun> {
        match self {
            PipelineOutcome::Succeeded(run) => Ok(run),
            PipelineOutcome::Failed { error, .. } => Err(error),
        }
    }
}

/// Sequences fetcher, stages and aggregator for one URL at a time
pub struct Orchestrator<F, R, S> {
    fetcher: F,
    client: R,
    storage: S,
    retry: RetryPolicy,
    pacer: Pacer,
    models: StageModels,
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl<F, R, S> Orchestrator<F, R, S>
where
    F: Fetcher,
    R: ReasoningClient,
    S: Storage,
{
    pub fn new(fetcher: F, client: R, storage: S, config: &AnalyzerConfig) -> Self {
        Self {
            fetcher,
            client,
            storage,
            retry: config.retry_policy(),
            pacer: config.pacer(),
            models: config.models.clone(),
            events: None,
        }
    }

    /// Report progress on `sender`
    pub fn with_events(mut self, sender: UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    async fn log(&self, message: &str) {
        if let Err(e) = self.storage.append_log(PIPELINE_LOG_TAG, message).await {
            warn!("Could not append to error log: {}", e);
        }
    }

    /// Analyse `url` end to end
    #[instrument(skip(self))]
    pub async fn run(&self, url: &str) -> PipelineOutcome {
        let names = match OutputNames::for_url(url) {
            Ok(names) => names,
            Err(e) => return PipelineOutcome::Failed { error: e, run: None },
        };

        self.emit(PipelineEvent::FetchStarted {
            url: url.to_string(),
        });
        let page = match self.fetcher.scrape(url).await {
            Ok(page) => page,
            Err(e) => {
                error!("Scraping failed: {}", e);
                self.log(&format!("Scraping {url} failed: {e}")).await;
                return PipelineOutcome::Failed {
                    error: Error::Fetch(e),
                    run: None,
                };
            }
        };
        info!(
            "Scraped {} paragraphs and {} images",
            page.paragraphs.len(),
            page.images.len()
        );
        self.emit(PipelineEvent::FetchCompleted {
            paragraphs: page.paragraphs.len(),
            images: page.images.len(),
        });

        if let Err(e) = self.storage.write_snapshot(&names.scrape_file(), &page).await {
            warn!("Could not write scrape snapshot: {}", e);
            self.log(&format!("Failed to write scrape snapshot: {e}")).await;
        }

        let mut document = SeoDocument::from_scrape(url, page);
        let document_file = names.analysis_file();
        match self.storage.write_document(&document_file, &document).await {
            Ok(path) => self.emit(PipelineEvent::Persisted { path }),
            Err(e) => {
                warn!("Could not persist scraped document: {}", e);
                self.log(&format!("Failed to persist document: {e}")).await;
            }
        }

        let ctx = StageContext::new(
            &self.client,
            &self.storage,
            self.retry,
            self.pacer,
            &document_file,
        );

        let mut stages = Vec::with_capacity(StageName::ANALYSIS.len() + 1);
        let mut first_fatal: Option<Error> = None;

        for stage in StageName::ANALYSIS {
            self.emit(PipelineEvent::StageStarted { stage });
            let outcome = match AnalysisStage::for_name(stage, &self.models) {
                Some(text_stage) => text_stage.run(&mut document, &ctx).await,
                None => ImageStage::new(&self.models).run(&mut document, &ctx).await,
            };
            self.track(stage, &outcome, &mut first_fatal);
            stages.push((stage, outcome));
        }

        let aggregator = Aggregator::new(&self.models);
        self.emit(PipelineEvent::StageStarted {
            stage: StageName::SeoReport,
        });
        let (report_outcome, report_path, analysis_path) = match aggregator
            .synthesize(&mut document, &ctx, &names.report_file())
            .await
        {
            Ok(report) => {
                if let Some(path) = &report.report_path {
                    self.emit(PipelineEvent::ReportWritten { path: path.clone() });
                }
                let outcome = StageOutcome::Success {
                    text: report.text,
                    persisted_path: report.analysis_path.clone(),
                };
                (outcome, report.report_path, report.analysis_path)
            }
            Err(failure) => (failure.outcome, None, failure.analysis_path),
        };
        self.track(StageName::SeoReport, &report_outcome, &mut first_fatal);
        stages.push((StageName::SeoReport, report_outcome));

        let run = PipelineRun {
            document,
            stages,
            analysis_path,
            report_path,
        };

        match first_fatal {
            None => {
                info!("Analysis of {} completed", url);
                PipelineOutcome::Succeeded(run)
            }
            Some(error) => {
                error!("Analysis of {} failed: {}", url, error);
                PipelineOutcome::Failed {
                    error,
                    run: Some(run),
                }
            }
        }
    }

    fn track(&self, stage: StageName, outcome: &StageOutcome, first_fatal: &mut Option<Error>) {
        match outcome {
            StageOutcome::Success {
                persisted_path: Some(path),
                ..
            } => self.emit(PipelineEvent::Persisted { path: path.clone() }),
            StageOutcome::Failure { message, .. } if outcome.is_fatal() && first_fatal.is_none() => {
                *first_fatal = Some(Error::StageFailed {
                    stage,
                    message: message.clone(),
                });
            }
            _ => {}
        }
        self.emit(PipelineEvent::StageFinished {
            stage,
            outcome: outcome.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FailureKind, prompts};
    use crate::document::{AnalysisResult, ImageRef};
    use crate::fetcher::{FetchError, ScrapedPage};
    use crate::llm::mock::{MockReasoningClient, MockReply};
    use crate::storage::{ERROR_LOG_FILE, FileStorage};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    struct StaticFetcher(Option<ScrapedPage>);

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn scrape(&self, _url: &str) -> Result<ScrapedPage, FetchError> {
            self.0
                .clone()
                .ok_or_else(|| FetchError::Other("connection refused".to_string()))
        }
    }

    fn page() -> ScrapedPage {
        ScrapedPage {
            title: "Example Domain".to_string(),
            meta_tags: BTreeMap::from([("description".to_string(), "An example".to_string())]),
            headings: BTreeMap::from([("h1".to_string(), vec!["Example Domain".to_string()])]),
            paragraphs: vec!["This domain is for use in illustrative examples in documents.".to_string()],
            images: vec![ImageRef::new("https://example.com/missing.gif")],
            scraped_at: Utc::now(),
        }
    }

    fn config(dir: &TempDir) -> AnalyzerConfig {
        AnalyzerConfig::builder()
            .output_dir(dir.path())
            .pacing_delay(Duration::ZERO)
            .retry_base_delay(Duration::from_secs(1))
            .build()
    }

    fn is_image_aggregate(request: &crate::llm::CompletionRequest) -> bool {
        request.system_prompt == prompts::IMAGE_SYSTEM
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_exhaustion_keeps_other_results() {
        let dir = TempDir::new().unwrap();
        let client = MockReasoningClient::new();
        client
            .add_rule(is_image_aggregate, MockReply::Error("Rate limit reached (TPM)".to_string()))
            .await;
        client.set_default_text("stage analysis").await;

        let orchestrator = Orchestrator::new(
            StaticFetcher(Some(page())),
            client.clone(),
            FileStorage::new(dir.path()),
            &config(&dir),
        );
        let outcome = orchestrator.run("https://example.com").await;

        assert!(outcome.is_success(), "{outcome:?}");
        let run = outcome.run().unwrap();
        assert_eq!(run.analysis_path, Some(dir.path().join("example_com_analysis.json")));

        let json = std::fs::read_to_string(dir.path().join("example_com_analysis.json")).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        for key in ["content_analysis", "keyword_analysis", "backlink_analysis", "url_analysis"] {
            assert_eq!(value[key], Value::String("stage analysis".to_string()), "{key}");
        }
        assert_eq!(
            value["image_analysis"]["error"],
            Value::String("Rate limit exceeded after 3 retries".to_string())
        );
        assert_eq!(value["title"], Value::String("Example Domain".to_string()));
        assert!(dir.path().join("example_com_simple_scrape.json").exists());
        assert!(dir.path().join("example_com_final_report.txt").exists());

        let log = std::fs::read_to_string(dir.path().join(ERROR_LOG_FILE)).unwrap();
        assert!(log.contains("[image] Rate limit exceeded after 3 retries"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let client = MockReasoningClient::new();
        let orchestrator = Orchestrator::new(
            StaticFetcher(None),
            client.clone(),
            FileStorage::new(dir.path()),
            &config(&dir),
        );

        let outcome = orchestrator.run("https://example.com").await;

        assert!(matches!(
            outcome,
            PipelineOutcome::Failed {
                error: Error::Fetch(_),
                run: None
            }
        ));
        assert_eq!(client.call_count().await, 0);
        assert!(!dir.path().join("example_com_analysis.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fatal_error_wins_and_later_stages_run() {
        let dir = TempDir::new().unwrap();
        let client = MockReasoningClient::new();
        client
            .add_rule(
                |request| request.system_prompt == prompts::CONTENT_SYSTEM,
                MockReply::Error("context length exceeded".to_string()),
            )
            .await;
        client
            .add_rule(
                |request| request.system_prompt == prompts::URL_SYSTEM,
                MockReply::Error("bad gateway".to_string()),
            )
            .await;
        client.set_default_text("fine").await;

        let orchestrator = Orchestrator::new(
            StaticFetcher(Some(page())),
            client,
            FileStorage::new(dir.path()),
            &config(&dir),
        );
        let outcome = orchestrator.run("https://example.com").await;

        let PipelineOutcome::Failed { error, run } = outcome else {
            panic!("expected failure");
        };
        assert!(matches!(
            error,
            Error::StageFailed {
                stage: StageName::Content,
                ..
            }
        ));

        let run = run.unwrap();
        assert_eq!(
            run.document.result(StageName::Keyword),
            Some(&AnalysisResult::text("fine"))
        );
        assert!(run.document.result(StageName::Url).unwrap().is_failed());
        assert_eq!(run.stages.len(), 6);
        assert!(matches!(
            run.stages[0].1,
            StageOutcome::Failure {
                kind: FailureKind::Fatal,
                ..
            }
        ));
        assert!(run.report_path.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stages_are_paced_sequentially() {
        let dir = TempDir::new().unwrap();
        let client = MockReasoningClient::new();
        client.set_default_text("ok").await;

        let config = AnalyzerConfig::builder()
            .output_dir(dir.path())
            .pacing_delay(Duration::from_secs(25))
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(
            StaticFetcher(Some(page())),
            client.clone(),
            FileStorage::new(dir.path()),
            &config,
        )
        .with_events(tx);

        let start = Instant::now();
        let outcome = orchestrator.run("https://example.com").await;
        assert!(outcome.is_success());

        // four text stages, the image aggregate and the report; the gif is never sent
        assert_eq!(client.call_count().await, 6);
        assert_eq!(start.elapsed(), Duration::from_secs(150));

        drop(orchestrator);
        let mut started = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PipelineEvent::StageStarted { stage } = event {
                started.push(stage);
            }
        }
        assert_eq!(
            started,
            [
                StageName::Content,
                StageName::Image,
                StageName::Keyword,
                StageName::Backlink,
                StageName::Url,
                StageName::SeoReport,
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_fetch() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(
            StaticFetcher(Some(page())),
            MockReasoningClient::new(),
            FileStorage::new(dir.path()),
            &config(&dir),
        );

        let outcome = orchestrator.run("not a url").await;
        assert!(matches!(
            outcome,
            PipelineOutcome::Failed {
                error: Error::InvalidUrl(_),
                ..
            }
        ));
    }
}
