//! # Fetcher Configuration
//!
//! Limits and HTTP settings for scraping a single page. Uses a builder in the
//! same way as the other configuration types in this crate.

use std::path::PathBuf;
use std::time::Duration;

/// Browser-like user agent; several sites refuse obvious bots
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0";

/// Configuration for the fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent to use for requests
    pub user_agent: String,

    /// Timeout for the page request
    pub request_timeout: Duration,

    /// Timeout for each image download
    pub image_timeout: Duration,

    /// Directory downloaded images are written to
    pub images_dir: PathBuf,

    /// Maximum number of images to collect
    pub max_images: usize,

    /// Maximum number of `<p>` elements to look at
    pub max_paragraphs: usize,

    /// Maximum number of headings kept per level
    pub max_headings_per_level: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            image_timeout: Duration::from_secs(10),
            images_dir: PathBuf::from("seo_output/images"),
            max_images: 10,
            max_paragraphs: 20,
            max_headings_per_level: 10,
        }
    }
}

/// Builder for FetcherConfig
#[derive(Debug, Default)]
pub struct FetcherConfigBuilder {
    config: FetcherConfig,
}

impl FetcherConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: FetcherConfig::default(),
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = request_timeout;
        self
    }

    pub fn image_timeout(mut self, image_timeout: Duration) -> Self {
        self.config.image_timeout = image_timeout;
        self
    }

    pub fn images_dir(mut self, images_dir: impl Into<PathBuf>) -> Self {
        self.config.images_dir = images_dir.into();
        self
    }

    pub fn max_images(mut self, max_images: usize) -> Self {
        self.config.max_images = max_images;
        self
    }

    pub fn build(self) -> FetcherConfig {
        self.config
    }
}

impl FetcherConfig {
    pub fn builder() -> FetcherConfigBuilder {
        FetcherConfigBuilder::new()
    }
}
