//! # SEO Document Model
//!
//! The single aggregate threaded through the pipeline. The Fetcher fills in
//! the scraped fields once; every analysis stage then writes exactly one named
//! slot in `analysis_results`, and the document is persisted after each write.
//!
//! The JSON layout is part of the external contract: scraped fields at the top
//! level and each stage result under its own key (`content_analysis`,
//! `image_analysis`, ...), flattened into the same object.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{Error, Result};
use crate::fetcher::ScrapedPage;

/// File types accepted for vision analysis
pub const VISION_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "png", "webp"];

/// One discovered image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Absolute URL the image was discovered at
    #[serde(rename = "url")]
    pub remote_url: String,

    /// Where the downloaded bytes live, if the download succeeded
    #[serde(default)]
    pub local_path: Option<PathBuf>,

    #[serde(rename = "alt", default)]
    pub alt_text: String,

    #[serde(default)]
    pub title: String,

    /// Download failure, kept so the entry stays in the list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageRef {
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            local_path: None,
            alt_text: String::new(),
            title: String::new(),
            error: None,
        }
    }

    /// Lowercase extension of the local file
    pub fn extension(&self) -> Option<String> {
        self.local_path
            .as_deref()
            .and_then(Path::extension)
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// True when the image has a local file of a vision-supported type
    pub fn is_vision_type(&self) -> bool {
        self.extension()
            .is_some_and(|ext| VISION_EXTENSIONS.contains(&ext.as_str()))
    }

    pub fn mime_type(&self) -> &'static str {
        match self.extension().as_deref() {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        }
    }
}

/// One-line description produced for a vision-analysed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescription {
    pub url: String,
    pub description: String,
}

/// Named result slot in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageName {
    #[serde(rename = "content_analysis")]
    Content,
    #[serde(rename = "image_analysis")]
    Image,
    #[serde(rename = "keyword_analysis")]
    Keyword,
    #[serde(rename = "backlink_analysis")]
    Backlink,
    #[serde(rename = "url_analysis")]
    Url,
    /// Synthesized report, when the reply was structured
    #[serde(rename = "seo_report")]
    SeoReport,
    /// Catch-all for a report reply that was not structured
    #[serde(rename = "analysis_report")]
    AnalysisReport,
}

impl StageName {
    /// The five analysis stages, in pipeline order
    pub const ANALYSIS: [StageName; 5] = [
        StageName::Content,
        StageName::Image,
        StageName::Keyword,
        StageName::Backlink,
        StageName::Url,
    ];

    /// Key under which the result is persisted
    pub fn key(&self) -> &'static str {
        match self {
            StageName::Content => "content_analysis",
            StageName::Image => "image_analysis",
            StageName::Keyword => "keyword_analysis",
            StageName::Backlink => "backlink_analysis",
            StageName::Url => "url_analysis",
            StageName::SeoReport => "seo_report",
            StageName::AnalysisReport => "analysis_report",
        }
    }

    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            StageName::Content => "content",
            StageName::Image => "image",
            StageName::Keyword => "keyword",
            StageName::Backlink => "backlink",
            StageName::Url => "url",
            StageName::SeoReport | StageName::AnalysisReport => "seo_report",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the reasoning service handed back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReasoningOutput {
    Text(String),
    Structured(Map<String, Value>),
}

impl ReasoningOutput {
    /// Interpret a reply: a JSON object (optionally inside a ```json fence)
    /// becomes `Structured`, anything else stays `Text`.
    pub fn from_reply(reply: &str) -> Self {
        let trimmed = reply.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|rest| rest.strip_suffix("```"))
            .map(str::trim)
            .unwrap_or(trimmed);

        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) if !is_failure_shaped(&map) => ReasoningOutput::Structured(map),
            _ => ReasoningOutput::Text(trimmed.to_string()),
        }
    }

    /// Human readable rendering
    pub fn to_text(&self) -> String {
        match self {
            ReasoningOutput::Text(text) => text.clone(),
            ReasoningOutput::Structured(map) => serde_json::to_string_pretty(map)
                .unwrap_or_else(|_| Value::Object(map.clone()).to_string()),
        }
    }
}

/// An object with exactly one string `error` field reads back as a stage failure
fn is_failure_shaped(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.get("error").is_some_and(Value::is_string)
}

/// Persisted failure marker for a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageFailure {
    pub error: String,
}

/// Content of one result slot: the whole result or an error, never a partial string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisResult {
    Failed(StageFailure),
    Completed(ReasoningOutput),
}

impl AnalysisResult {
    pub fn text(text: impl Into<String>) -> Self {
        AnalysisResult::Completed(ReasoningOutput::Text(text.into()))
    }

    pub fn failed(error: impl Into<String>) -> Self {
        AnalysisResult::Failed(StageFailure {
            error: error.into(),
        })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AnalysisResult::Failed(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            AnalysisResult::Failed(failure) => Some(&failure.error),
            AnalysisResult::Completed(_) => None,
        }
    }
}

/// The mutable aggregate passed through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoDocument {
    pub url: String,

    pub title: String,

    #[serde(default)]
    pub meta_tags: BTreeMap<String, String>,

    #[serde(default)]
    pub headings: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub paragraphs: Vec<String>,

    #[serde(default)]
    pub images: Vec<ImageRef>,

    pub scraped_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_descriptions: Vec<ImageDescription>,

    #[serde(flatten)]
    pub analysis_results: BTreeMap<StageName, AnalysisResult>,
}

/// Scraped fields only; what stages are allowed to send out
#[derive(Serialize)]
struct SourceView<'a> {
    url: &'a str,
    title: &'a str,
    meta_tags: &'a BTreeMap<String, String>,
    headings: &'a BTreeMap<String, Vec<String>>,
    paragraphs: &'a [String],
    images: &'a [ImageRef],
}

impl SeoDocument {
    /// Create the document from the Fetcher's output
    pub fn from_scrape(url: impl Into<String>, page: ScrapedPage) -> Self {
        Self {
            url: url.into(),
            title: page.title,
            meta_tags: page.meta_tags,
            headings: page.headings,
            paragraphs: page.paragraphs,
            images: page.images,
            scraped_at: page.scraped_at,
            image_descriptions: Vec::new(),
            analysis_results: BTreeMap::new(),
        }
    }

    /// Replace the slot for `stage`
    ///
    /// A structured reply shaped like a failure marker is kept as its JSON
    /// text so it still reads back as a completed result.
    pub fn record(&mut self, stage: StageName, result: AnalysisResult) {
        let result = match result {
            AnalysisResult::Completed(ReasoningOutput::Structured(map))
                if is_failure_shaped(&map) =>
            {
                AnalysisResult::text(Value::Object(map).to_string())
            }
            other => other,
        };
        self.analysis_results.insert(stage, result);
    }

    pub fn result(&self, stage: StageName) -> Option<&AnalysisResult> {
        self.analysis_results.get(&stage)
    }

    /// The scraped fields as JSON, without any stage results
    pub fn source_json(&self) -> Result<String> {
        let view = SourceView {
            url: &self.url,
            title: &self.title,
            meta_tags: &self.meta_tags,
            headings: &self.headings,
            paragraphs: &self.paragraphs,
            images: &self.images,
        };
        Ok(serde_json::to_string(&view)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Output file names derived from the target URL's host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
    stem: String,
}

impl OutputNames {
    pub fn for_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("{url}: missing host")))?;

        let mut stem = host.replace('.', "_");
        if let Some(port) = parsed.port() {
            stem.push_str(&format!("_{port}"));
        }
        Ok(Self { stem })
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn analysis_file(&self) -> String {
        format!("{}_analysis.json", self.stem)
    }

    pub fn report_file(&self) -> String {
        format!("{}_final_report.txt", self.stem)
    }

    pub fn scrape_file(&self) -> String {
        format!("{}_simple_scrape.json", self.stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_document() -> SeoDocument {
        let mut meta_tags = BTreeMap::new();
        meta_tags.insert("description".to_string(), "A test page".to_string());
        let mut headings = BTreeMap::new();
        headings.insert("h1".to_string(), vec!["Welcome".to_string()]);

        SeoDocument {
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            meta_tags,
            headings,
            paragraphs: vec!["Some paragraph text".to_string()],
            images: vec![ImageRef {
                remote_url: "https://example.com/a.png".to_string(),
                local_path: Some(PathBuf::from("seo_output/images/example_com_a.png")),
                alt_text: "logo".to_string(),
                title: String::new(),
                error: None,
            }],
            scraped_at: Utc::now(),
            image_descriptions: Vec::new(),
            analysis_results: BTreeMap::new(),
        }
    }

    #[test]
    fn test_stage_keys_serialize_flat() {
        let mut doc = sample_document();
        doc.record(StageName::Content, AnalysisResult::text("looks good"));
        doc.record(StageName::Image, AnalysisResult::failed("Rate limit exceeded after 3 retries"));

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["content_analysis"], json!("looks good"));
        assert_eq!(
            value["image_analysis"],
            json!({"error": "Rate limit exceeded after 3 retries"})
        );
        assert_eq!(value["images"][0]["url"], json!("https://example.com/a.png"));
        assert_eq!(value["images"][0]["alt"], json!("logo"));
        assert!(value.get("image_descriptions").is_none());
    }

    #[test]
    fn test_round_trip_preserves_types() {
        let mut doc = sample_document();
        let structured = json!({
            "overall_seo_score": 7,
            "ratio": 0.5,
            "indexable": true,
            "priority_actions": ["add alt text", {"nested": [1, 2, null]}],
        });
        let Value::Object(map) = structured else {
            unreachable!()
        };
        doc.record(
            StageName::SeoReport,
            AnalysisResult::Completed(ReasoningOutput::Structured(map)),
        );
        doc.record(StageName::Keyword, AnalysisResult::text("| kw | 3 |"));
        doc.record(StageName::Url, AnalysisResult::failed("boom"));
        doc.image_descriptions.push(ImageDescription {
            url: "https://example.com/a.png".to_string(),
            description: "A logo".to_string(),
        });

        let json = doc.to_json_pretty().unwrap();
        let restored = SeoDocument::from_json(&json).unwrap();

        assert_eq!(restored, doc);
    }

    #[test]
    fn test_structured_error_key_is_not_a_failure() {
        let value = json!({"error": "none found", "count": 0});
        let result: AnalysisResult = serde_json::from_value(value).unwrap();
        assert!(!result.is_failed());

        let value = json!({"error": "boom"});
        let result: AnalysisResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.error(), Some("boom"));
    }

    #[test]
    fn test_error_only_reply_round_trips_as_completed() {
        let reply = r#"{"error": "no backlinks found"}"#;
        let output = ReasoningOutput::from_reply(reply);
        assert_eq!(output, ReasoningOutput::Text(reply.to_string()));

        let mut doc = sample_document();
        doc.record(StageName::Backlink, AnalysisResult::Completed(output));

        let Value::Object(map) = json!({"error": "no backlinks found"}) else {
            unreachable!()
        };
        doc.record(
            StageName::SeoReport,
            AnalysisResult::Completed(ReasoningOutput::Structured(map)),
        );
        assert!(!doc.result(StageName::SeoReport).unwrap().is_failed());

        let restored = SeoDocument::from_json(&doc.to_json_pretty().unwrap()).unwrap();
        assert_eq!(restored, doc);
        assert!(!restored.result(StageName::Backlink).unwrap().is_failed());
        assert!(!restored.result(StageName::SeoReport).unwrap().is_failed());
    }

    #[test]
    fn test_source_json_excludes_results() {
        let mut doc = sample_document();
        doc.record(StageName::Content, AnalysisResult::text("secret"));

        let source = doc.source_json().unwrap();
        assert!(source.contains("Welcome"));
        assert!(!source.contains("secret"));
        assert!(!source.contains("content_analysis"));
    }

    #[test]
    fn test_reasoning_output_from_reply() {
        assert_eq!(
            ReasoningOutput::from_reply("plain words"),
            ReasoningOutput::Text("plain words".to_string())
        );
        assert!(matches!(
            ReasoningOutput::from_reply("```json\n{\"score\": 8}\n```"),
            ReasoningOutput::Structured(_)
        ));
        assert!(matches!(
            ReasoningOutput::from_reply("[1, 2]"),
            ReasoningOutput::Text(_)
        ));
    }

    #[test]
    fn test_output_names() {
        let names = OutputNames::for_url("https://www.example.co.uk/some/page").unwrap();
        assert_eq!(names.analysis_file(), "www_example_co_uk_analysis.json");
        assert_eq!(names.report_file(), "www_example_co_uk_final_report.txt");

        let names = OutputNames::for_url("http://127.0.0.1:8080/").unwrap();
        assert_eq!(names.stem(), "127_0_0_1_8080");

        assert!(OutputNames::for_url("not a url").is_err());
    }

    #[test]
    fn test_vision_type_detection() {
        let mut image = ImageRef::new("https://example.com/x");
        assert!(!image.is_vision_type());

        image.local_path = Some(PathBuf::from("images/photo.JPG"));
        assert!(image.is_vision_type());
        assert_eq!(image.mime_type(), "image/jpeg");

        image.local_path = Some(PathBuf::from("images/anim.gif"));
        assert!(!image.is_vision_type());
    }
}
