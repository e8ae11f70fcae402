//! # Aggregator
//!
//! Merges the scraped fields and every stage result into the final persisted
//! document, and synthesizes a cross-stage report with one more reasoning
//! request under the usual pacing and retry rules.
//!
//! The report reply is interpreted once: a JSON object is stored as
//! `seo_report`, anything else is kept verbatim under `analysis_report`. The
//! report file always receives a readable text rendering.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{error, info, instrument};

use crate::analysis::prompts;
use crate::analysis::{StageContext, StageError, StageOutcome};
use crate::config::StageModels;
use crate::document::{AnalysisResult, ReasoningOutput, SeoDocument, StageName};
use crate::error::Result;
use crate::llm::{CompletionRequest, ReasoningClient};
use crate::storage::Storage;

/// Output cap for the report request
pub const REPORT_MAX_TOKENS: u32 = 200;

static PRIORITY_SECTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?si)###\s*priority action plan[^\n]*\n?(.*?)(?:###|\z)").ok()
});

/// The body of the "Priority Action Plan" section, up to the next `###`
/// heading or the end of the text.
pub fn priority_section(report: &str) -> Option<String> {
    let regex = PRIORITY_SECTION.as_ref()?;
    regex
        .captures(report)
        .and_then(|captures| captures.get(1))
        .map(|body| body.as_str().trim().to_string())
        .filter(|body| !body.is_empty())
}

/// The document as it is persisted. Pure: the same document always merges to
/// the same bytes.
pub fn merge(document: &SeoDocument) -> Result<String> {
    document.to_json_pretty()
}

/// Render a structured report as markdown sections, one per key
pub fn render_structured(report: &Map<String, Value>) -> String {
    let mut sections = Vec::with_capacity(report.len());
    for (key, value) in report {
        let body = match value {
            Value::String(text) => text.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => format!("- {text}"),
                    other => format!("- {other}"),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Value::Null => String::new(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        sections.push(format!("### {}\n{}", heading(key), body));
    }
    sections.join("\n\n")
}

fn heading(key: &str) -> String {
    key.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A synthesized report
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub output: ReasoningOutput,
    /// What was written to the report file
    pub text: String,
    pub report_path: Option<PathBuf>,
    pub analysis_path: Option<PathBuf>,
}

/// A report request that failed after its error entry was persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ReportFailure {
    pub outcome: StageOutcome,
    pub analysis_path: Option<PathBuf>,
}

/// Final aggregation step
#[derive(Debug, Clone)]
pub struct Aggregator {
    model: String,
    max_tokens: u32,
}

impl Aggregator {
    pub fn new(models: &StageModels) -> Self {
        Self {
            model: models.text.clone(),
            max_tokens: REPORT_MAX_TOKENS,
        }
    }

    /// Persist the merged document and return where it went
    pub async fn finalize<R, S>(
        &self,
        document: &SeoDocument,
        ctx: &StageContext<'_, R, S>,
    ) -> Option<PathBuf>
    where
        R: ReasoningClient,
        S: Storage,
    {
        ctx.persist(StageName::SeoReport, document).await
    }

    fn request(&self, document: &SeoDocument) -> std::result::Result<CompletionRequest, StageError> {
        let mut source = document.clone();
        source.analysis_results.remove(&StageName::SeoReport);
        source.analysis_results.remove(&StageName::AnalysisReport);
        let payload = serde_json::to_string(&source).map_err(|e| StageError::Payload(e.to_string()))?;

        Ok(CompletionRequest::new(
            &self.model,
            prompts::REPORT_SYSTEM,
            prompts::report(&payload),
            self.max_tokens,
        ))
    }

    /// Ask for the cross-stage report, record it in the document, write the
    /// report file and persist.
    ///
    /// Tolerates any subset of failed stages. A failed request is recorded as
    /// an `error` entry under `seo_report`, persisted once, and returned with
    /// the document's path.
    #[instrument(skip_all, fields(url = %document.url))]
    pub async fn synthesize<R, S>(
        &self,
        document: &mut SeoDocument,
        ctx: &StageContext<'_, R, S>,
        report_file: &str,
    ) -> std::result::Result<Report, ReportFailure>
    where
        R: ReasoningClient,
        S: Storage,
    {
        ctx.pace(StageName::SeoReport).await;

        let reply = match self.request(document) {
            Ok(request) => ctx.complete(StageName::SeoReport, &request).await,
            Err(e) => Err(e),
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                document.analysis_results.remove(&StageName::AnalysisReport);
                let (outcome, analysis_path) = ctx
                    .settle_persisted(document, StageName::SeoReport, Err(e))
                    .await;
                return Err(ReportFailure {
                    outcome,
                    analysis_path,
                });
            }
        };

        let output = ReasoningOutput::from_reply(&reply);
        let text = match &output {
            ReasoningOutput::Structured(map) => {
                document.analysis_results.remove(&StageName::AnalysisReport);
                document.record(StageName::SeoReport, AnalysisResult::Completed(output.clone()));
                render_structured(map)
            }
            ReasoningOutput::Text(text) => {
                info!("Report reply is not a JSON object, keeping raw text");
                document.analysis_results.remove(&StageName::SeoReport);
                document.record(StageName::AnalysisReport, AnalysisResult::Completed(output.clone()));
                text.clone()
            }
        };

        let report_path = match ctx.storage.write_report(report_file, &text).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to write report: {}", e);
                ctx.log(StageName::SeoReport, &format!("Failed to write report: {e}"))
                    .await;
                None
            }
        };
        let analysis_path = self.finalize(document, ctx).await;

        Ok(Report {
            output,
            text,
            report_path,
            analysis_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FailureKind;
    use crate::document::OutputNames;
    use crate::fetcher::ScrapedPage;
    use crate::llm::mock::MockReasoningClient;
    use crate::retry::{Pacer, RetryPolicy};
    use crate::storage::FileStorage;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use crate::storage::StorageError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn partial_document() -> SeoDocument {
        let page = ScrapedPage {
            title: "Example".to_string(),
            meta_tags: BTreeMap::from([("description".to_string(), "desc".to_string())]),
            headings: BTreeMap::new(),
            paragraphs: vec![],
            images: vec![],
            scraped_at: Utc::now(),
        };
        let mut doc = SeoDocument::from_scrape("https://example.com", page);
        doc.record(StageName::Content, AnalysisResult::text("content ok"));
        doc.record(StageName::Image, AnalysisResult::failed("Rate limit exceeded after 3 retries"));
        doc
    }

    #[test]
    fn test_priority_section_extraction() {
        let report = "### Executive Summary\nFine.\n\n### Priority Action Plan\n1. Add alt text\n2. Fix title\n\n### Overall Seo Score\n6";
        assert_eq!(
            priority_section(report).as_deref(),
            Some("1. Add alt text\n2. Fix title")
        );

        let trailing = "intro\n### Priority Action Plan:\n- one\n- two";
        assert_eq!(priority_section(trailing).as_deref(), Some("- one\n- two"));

        assert!(priority_section("no such heading").is_none());
    }

    #[test]
    fn test_render_structured() {
        let Value::Object(map) = json!({
            "executive_summary": "Short.",
            "priority_action_plan": ["Add alt text", "Shorten title"],
            "overall_seo_score": 6
        }) else {
            unreachable!()
        };

        let text = render_structured(&map);
        assert!(text.contains("### Executive Summary\nShort."));
        assert!(text.contains("### Priority Action Plan\n- Add alt text\n- Shorten title"));
        assert!(text.contains("### Overall Seo Score\n6"));
        assert_eq!(
            priority_section(&text).as_deref(),
            Some("- Add alt text\n- Shorten title")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_structured_reply_is_stored_as_seo_report() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let client = MockReasoningClient::new();
        client
            .push_text(r#"```json
{"executive_summary": "ok", "priority_action_plan": ["a"], "overall_seo_score": 7}
```"#)
            .await;

        let names = OutputNames::for_url("https://example.com").unwrap();
        let file = names.analysis_file();
        let ctx = StageContext::new(&client, &storage, RetryPolicy::default(), Pacer::disabled(), &file);
        let mut doc = partial_document();

        let report = Aggregator::new(&StageModels::default())
            .synthesize(&mut doc, &ctx, &names.report_file())
            .await
            .unwrap();

        assert!(matches!(report.output, ReasoningOutput::Structured(_)));
        assert_eq!(report.report_path, Some(dir.path().join("example_com_final_report.txt")));
        let written = storage.read_text(&names.report_file()).await.unwrap();
        assert_eq!(written, report.text);

        let stored = storage.read_document(&file).await.unwrap();
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["seo_report"]["overall_seo_score"], json!(7));
        assert!(value.get("analysis_report").is_none());
        assert_eq!(value["image_analysis"]["error"], json!("Rate limit exceeded after 3 retries"));

        let request = &client.calls().await[0].request;
        assert_eq!(request.max_tokens, REPORT_MAX_TOKENS);
        assert!(request.user_prompt.contains("content ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_reply_falls_back_to_analysis_report() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let client = MockReasoningClient::new();
        client.push_text("### Priority Action Plan\n1. Write more").await;

        let ctx = StageContext::new(&client, &storage, RetryPolicy::default(), Pacer::disabled(), "doc.json");
        let mut doc = partial_document();

        let report = Aggregator::new(&StageModels::default())
            .synthesize(&mut doc, &ctx, "report.txt")
            .await
            .unwrap();

        assert_eq!(report.text, "### Priority Action Plan\n1. Write more");
        assert_eq!(
            doc.result(StageName::AnalysisReport),
            Some(&AnalysisResult::text("### Priority Action Plan\n1. Write more"))
        );
        assert!(doc.result(StageName::SeoReport).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_report_records_error() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let client = MockReasoningClient::new();
        client.push_error("upstream unavailable").await;

        let ctx = StageContext::new(&client, &storage, RetryPolicy::default(), Pacer::disabled(), "doc.json");
        let mut doc = partial_document();

        let failure = Aggregator::new(&StageModels::default())
            .synthesize(&mut doc, &ctx, "report.txt")
            .await
            .unwrap_err();

        assert!(matches!(failure.outcome, StageOutcome::Failure { kind: FailureKind::Fatal, .. }));
        assert_eq!(failure.analysis_path, Some(dir.path().join("doc.json")));
        assert!(doc.result(StageName::SeoReport).unwrap().is_failed());
        assert_eq!(doc.result(StageName::Content), Some(&AnalysisResult::text("content ok")));
    }

    /// File storage that counts document writes
    struct CountingStorage {
        inner: FileStorage,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Storage for CountingStorage {
        async fn write_document(
            &self,
            name: &str,
            document: &SeoDocument,
        ) -> std::result::Result<PathBuf, StorageError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write_document(name, document).await
        }

        async fn read_document(&self, name: &str) -> std::result::Result<SeoDocument, StorageError> {
            self.inner.read_document(name).await
        }

        async fn write_snapshot(
            &self,
            name: &str,
            page: &ScrapedPage,
        ) -> std::result::Result<PathBuf, StorageError> {
            self.inner.write_snapshot(name, page).await
        }

        async fn write_report(&self, name: &str, text: &str) -> std::result::Result<PathBuf, StorageError> {
            self.inner.write_report(name, text).await
        }

        async fn append_log(&self, stage: &str, message: &str) -> std::result::Result<(), StorageError> {
            self.inner.append_log(stage, message).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_report_persists_document_once() {
        let dir = TempDir::new().unwrap();
        let storage = CountingStorage {
            inner: FileStorage::new(dir.path()),
            writes: AtomicUsize::new(0),
        };
        let client = MockReasoningClient::new();
        client.push_error("upstream unavailable").await;

        let ctx = StageContext::new(&client, &storage, RetryPolicy::default(), Pacer::disabled(), "doc.json");
        let mut doc = partial_document();

        let failure = Aggregator::new(&StageModels::default())
            .synthesize(&mut doc, &ctx, "report.txt")
            .await
            .unwrap_err();

        assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
        let path = failure.analysis_path.unwrap();
        let persisted = storage.inner.read_document("doc.json").await.unwrap();
        assert_eq!(path, dir.path().join("doc.json"));
        assert!(persisted.result(StageName::SeoReport).unwrap().is_failed());
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        let client = MockReasoningClient::new();
        let ctx = StageContext::new(&client, &storage, RetryPolicy::default(), Pacer::disabled(), "doc.json");
        let aggregator = Aggregator::new(&StageModels::default());

        let doc = partial_document();
        let path = aggregator.finalize(&doc, &ctx).await.unwrap();
        let first = std::fs::read(&path).unwrap();

        let reloaded = storage.read_document("doc.json").await.unwrap();
        aggregator.finalize(&reloaded, &ctx).await.unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(merge(&reloaded).unwrap().into_bytes(), second);
        assert_eq!(client.call_count().await, 0);
    }
}
