//! # Output Storage
//!
//! Durable home for everything a run produces: the analysis document (rewritten
//! after every stage), the scrape snapshot, the final report and the
//! append-only error log.
//!
//! Documents are written to a temporary sibling first and renamed into place,
//! so a reader never observes a half-written JSON file.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::document::SeoDocument;
use crate::fetcher::ScrapedPage;

/// Name of the append-only failure log inside the output directory
pub const ERROR_LOG_FILE: &str = "error.log";

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

type Result<T> = std::result::Result<T, StorageError>;

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Where pipeline artifacts go
#[async_trait]
pub trait Storage: Send + Sync {
    /// Replace the named document file and return its path
    async fn write_document(&self, name: &str, document: &SeoDocument) -> Result<PathBuf>;

    async fn read_document(&self, name: &str) -> Result<SeoDocument>;

    /// Write the Fetcher output as its own JSON file
    async fn write_snapshot(&self, name: &str, page: &ScrapedPage) -> Result<PathBuf>;

    /// Write the synthesized report text
    async fn write_report(&self, name: &str, text: &str) -> Result<PathBuf>;

    /// Append one timestamped line, tagged with the originating stage, to the error log
    async fn append_log(&self, stage: &str, message: &str) -> Result<()>;
}

/// Storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    output_dir: PathBuf,
}

impl FileStorage {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.path_for(ERROR_LOG_FILE)
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(io_error(&self.output_dir))
    }

    async fn write_atomic(&self, name: &str, contents: &[u8]) -> Result<PathBuf> {
        self.ensure_dir().await?;
        let path = self.path_for(name);
        let tmp = self.path_for(&format!(".{name}.tmp"));

        fs::write(&tmp, contents).await.map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).await.map_err(io_error(&path))?;
        debug!("Wrote {} bytes to {}", contents.len(), path.display());
        Ok(path)
    }

    /// Read a text artifact by file name
    pub async fn read_text(&self, name: &str) -> Result<String> {
        let path = self.path_for(name);
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    /// Files in the output directory, sorted by name; empty if it does not exist
    pub async fn list_outputs(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.output_dir)(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_error(&self.output_dir))?
        {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if path.is_file() && !hidden {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl Storage for FileStorage {
    #[instrument(skip(self, document), fields(url = %document.url))]
    async fn write_document(&self, name: &str, document: &SeoDocument) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(document)?;
        self.write_atomic(name, json.as_bytes()).await
    }

    async fn read_document(&self, name: &str) -> Result<SeoDocument> {
        let json = self.read_text(name).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn write_snapshot(&self, name: &str, page: &ScrapedPage) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(page)?;
        self.write_atomic(name, json.as_bytes()).await
    }

    async fn write_report(&self, name: &str, text: &str) -> Result<PathBuf> {
        self.write_atomic(name, text.as_bytes()).await
    }

    async fn append_log(&self, stage: &str, message: &str) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.error_log_path();
        let line = format!(
            "[{}] [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            stage,
            message
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error(&path))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(io_error(&path))?;
        file.flush().await.map_err(io_error(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{AnalysisResult, StageName};
    use chrono::Utc;
    use regex::Regex;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn document() -> SeoDocument {
        let page = ScrapedPage {
            title: "Example".to_string(),
            meta_tags: BTreeMap::new(),
            headings: BTreeMap::new(),
            paragraphs: vec![],
            images: vec![],
            scraped_at: Utc::now(),
        };
        SeoDocument::from_scrape("https://example.com", page)
    }

    #[tokio::test]
    async fn test_document_write_then_read() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("out"));

        let mut doc = document();
        doc.record(StageName::Content, AnalysisResult::text("fine"));

        let path = storage.write_document("example_com_analysis.json", &doc).await.unwrap();
        assert_eq!(path, dir.path().join("out/example_com_analysis.json"));

        let restored = storage.read_document("example_com_analysis.json").await.unwrap();
        assert_eq!(restored, doc);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());

        let mut doc = document();
        storage.write_document("doc.json", &doc).await.unwrap();
        doc.record(StageName::Url, AnalysisResult::failed("boom"));
        storage.write_document("doc.json", &doc).await.unwrap();

        let restored = storage.read_document("doc.json").await.unwrap();
        assert_eq!(restored.result(StageName::Url).and_then(|r| r.error()), Some("boom"));
        assert_eq!(storage.list_outputs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_document_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());

        let err = storage.read_document("nope.json").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_append_log_format() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());

        storage.append_log("image", "Rate limit exceeded after 3 retries").await.unwrap();
        storage.append_log("content", "bad request").await.unwrap();

        let log = storage.read_text(ERROR_LOG_FILE).await.unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);

        let pattern = Regex::new(r"^\[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\] \[image\] Rate limit exceeded after 3 retries$").unwrap();
        assert!(pattern.is_match(lines[0]), "{}", lines[0]);
        assert!(lines[1].ends_with("[content] bad request"));
    }

    #[tokio::test]
    async fn test_list_outputs_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("never-created"));
        assert!(storage.list_outputs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_dir_reports_io_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let storage = FileStorage::new(&blocker);
        let err = storage.write_report("r.txt", "text").await.unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }
}
