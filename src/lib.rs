//! # seolens - Rate-Limit Aware SEO Analysis
//!
//! This crate scrapes a web page and runs a multi-stage SEO analysis over it
//! with a hosted large language model. Each stage writes its own slot in a
//! shared document that is persisted after every step, so a partial run is
//! always inspectable.
//!
//! ## Features
//!
//! - Page scraping with reqwest and scraper, including image downloads
//! - Five analysis stages: content, image (vision), keyword, backlink, url
//! - Pacing before every request plus exponential backoff on rate limits
//! - Client-side request quota with governor
//! - Final synthesized report with a structured or plain text fallback
//! - Async API with Tokio
//!
//! ## Example
//!
//! ```rust,no_run
//! use seolens::config::AnalyzerConfig;
//! use seolens::fetcher::HttpFetcher;
//! use seolens::llm::ChatClient;
//! use seolens::pipeline::Orchestrator;
//! use seolens::storage::FileStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AnalyzerConfig::default();
//!     let fetcher = HttpFetcher::new(config.fetcher_config())?;
//!     let client = ChatClient::with_api_key_and_options("your-api-key", config.client_options())?;
//!     let storage = FileStorage::new(config.output_dir());
//!
//!     let orchestrator = Orchestrator::new(fetcher, client, storage, &config);
//!     let run = orchestrator.run("https://example.com").await.into_result()?;
//!
//!     println!("Analysis saved to {:?}", run.analysis_path);
//!     Ok(())
//! }
//! ```

mod error;

pub mod analysis;
pub mod config;
pub mod document;
pub mod fetcher;
pub mod llm;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod storage;

pub use error::{Error, Result};

/// Commonly used types
pub mod prelude {
    pub use crate::config::AnalyzerConfig;
    pub use crate::document::{AnalysisResult, OutputNames, ReasoningOutput, SeoDocument, StageName};
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::pipeline::{Orchestrator, PipelineEvent, PipelineOutcome};
}
