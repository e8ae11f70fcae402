//! # Analyzer Configuration
//!
//! One explicit configuration value for a run, built once (defaults, then CLI
//! flags) and injected into the orchestrator. Components only ever receive the
//! slice they need: the retry policy, the pacer, the stage models, or the
//! fetcher and client settings.
//!
//! ## Key Components
//!
//! - `AnalyzerConfig`: every tunable of a run
//! - `AnalyzerConfigBuilder`: builder for overriding defaults
//! - `StageModels`: which model each kind of request goes to

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetcher::FetcherConfig;
use crate::llm::{ClientOptions, DEFAULT_BASE_URL};
use crate::retry::{Pacer, RetryPolicy};

/// Default model for text and vision requests
pub const DEFAULT_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";

/// Default model for keyword research, which benefits from search access
pub const DEFAULT_KEYWORD_MODEL: &str = "compound-beta";

/// Environment variable holding the reasoning service API key
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Model names per kind of request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageModels {
    /// Content, backlink, url, image metadata and report requests
    pub text: String,

    /// Per-image description requests
    pub vision: String,

    pub keyword: String,
}

impl Default for StageModels {
    fn default() -> Self {
        Self {
            text: DEFAULT_MODEL.to_string(),
            vision: DEFAULT_MODEL.to_string(),
            keyword: DEFAULT_KEYWORD_MODEL.to_string(),
        }
    }
}

/// Configuration for an analysis run
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Retries allowed after a rate-limited request
    pub max_retries: u32,

    /// Base delay of the exponential backoff
    pub retry_base_delay: Duration,

    /// Fixed wait before every reasoning request
    pub pacing_delay: Duration,

    /// Where documents, reports and logs are written
    pub output_dir: PathBuf,

    /// Where downloaded images are written
    pub images_dir: PathBuf,

    /// Timeout for page fetches and reasoning requests
    pub request_timeout: Duration,

    pub models: StageModels,

    /// Base URL of the OpenAI-compatible API
    pub api_base_url: String,

    /// Client-side request quota
    pub requests_per_minute: NonZeroU32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(30),
            pacing_delay: Duration::from_secs(25),
            output_dir: PathBuf::from("seo_output"),
            images_dir: PathBuf::from("seo_output/images"),
            request_timeout: Duration::from_secs(30),
            models: StageModels::default(),
            api_base_url: DEFAULT_BASE_URL.to_string(),
            requests_per_minute: NonZeroU32::new(30).unwrap_or(NonZeroU32::MIN),
        }
    }
}

/// Builder for AnalyzerConfig
#[derive(Debug, Default)]
pub struct AnalyzerConfigBuilder {
    config: AnalyzerConfig,
    images_dir_set: bool,
}

impl AnalyzerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn pacing_delay(mut self, delay: Duration) -> Self {
        self.config.pacing_delay = delay;
        self
    }

    /// Set the output directory; the images directory follows it unless set explicitly
    pub fn output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = output_dir.into();
        self
    }

    pub fn images_dir(mut self, images_dir: impl Into<PathBuf>) -> Self {
        self.config.images_dir = images_dir.into();
        self.images_dir_set = true;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.config.models.text = model.clone();
        self.config.models.vision = model;
        self
    }

    pub fn keyword_model(mut self, model: impl Into<String>) -> Self {
        self.config.models.keyword = model.into();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn requests_per_minute(mut self, rpm: NonZeroU32) -> Self {
        self.config.requests_per_minute = rpm;
        self
    }

    /// Build the configuration
    pub fn build(mut self) -> AnalyzerConfig {
        if !self.images_dir_set {
            self.config.images_dir = self.config.output_dir.join("images");
        }
        self.config
    }
}

impl AnalyzerConfig {
    /// Create a new builder
    pub fn builder() -> AnalyzerConfigBuilder {
        AnalyzerConfigBuilder::new()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_base_delay)
    }

    pub fn pacer(&self) -> Pacer {
        Pacer::new(self.pacing_delay)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig::builder()
            .request_timeout(self.request_timeout)
            .images_dir(self.images_dir.clone())
            .build()
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.api_base_url.clone(),
            timeout: self.request_timeout,
        }
    }
}
