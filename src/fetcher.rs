//! # Page Fetcher
//!
//! Retrieves a target page and turns it into the raw material for analysis:
//! title, meta tags, headings, paragraphs and the page's images, downloaded
//! to local files so the image stage can send their bytes to a vision model.
//!
//! ## Key Components
//!
//! - `Fetcher`: the seam the pipeline depends on
//! - `HttpFetcher`: reqwest + scraper implementation
//! - `ScrapedPage`: the output contract
//! - `normalize_target_url`: turns user input into a fetchable URL

mod config;
mod download;
mod error;
mod extraction;

pub use config::{DEFAULT_USER_AGENT, FetcherConfig, FetcherConfigBuilder};
pub use download::image_file_name;
pub use error::FetchError;
pub use extraction::{ExtractedPage, extract_page};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use url::Url;

use crate::document::{ImageRef, OutputNames};

/// What a scrape produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub title: String,
    pub meta_tags: BTreeMap<String, String>,
    pub headings: BTreeMap<String, Vec<String>>,
    pub paragraphs: Vec<String>,
    pub images: Vec<ImageRef>,
    pub scraped_at: DateTime<Utc>,
}

/// Retrieves page content and image bytes for a URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, FetchError>;
}

/// Trim user input and add `https://` when no scheme was given.
pub fn normalize_target_url(input: &str) -> Result<String, FetchError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FetchError::InvalidUrl("empty URL".to_string()));
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate)?;
    if parsed.host_str().is_none() {
        return Err(FetchError::InvalidUrl(format!("{input}: missing host")));
    }
    Ok(candidate)
}

/// Fetcher backed by a plain HTTP client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    image_client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()?;
        let image_client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.image_timeout)
            .build()?;
        Ok(Self {
            client,
            image_client,
            config,
        })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, FetchError> {
        info!("Scraping {}", url);
        let stem = OutputNames::for_url(url)
            .map_err(|e| FetchError::InvalidUrl(e.to_string()))?
            .stem()
            .to_string();

        let html = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let page = extract_page(url, &html, &self.config)?;
        let images = download::download_images(
            &self.image_client,
            &self.config.images_dir,
            &stem,
            page.images,
        )
        .await;

        info!(
            "Found {} paragraphs, {} images",
            page.paragraphs.len(),
            images.len()
        );

        Ok(ScrapedPage {
            title: page.title,
            meta_tags: page.meta_tags,
            headings: page.headings,
            paragraphs: page.paragraphs,
            images,
            scraped_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[test]
    fn test_normalize_target_url() {
        assert_eq!(
            normalize_target_url("  example.com ").unwrap(),
            "https://example.com"
        );
        assert_eq!(
            normalize_target_url("http://example.com/a").unwrap(),
            "http://example.com/a"
        );
        assert!(normalize_target_url("   ").is_err());
    }

    #[tokio::test]
    async fn test_scrape_downloads_images() {
        let mut server = Server::new_async().await;
        let html = r#"<html><head><title>Shop</title></head><body>
            <h1>Shop</h1>
            <img src="/logo.png" alt="logo">
            <img src="/gone.jpg">
        </body></html>"#;
        let page_mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(html)
            .create_async()
            .await;
        let logo_mock = server
            .mock("GET", "/logo.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body([137u8, 80, 78, 71])
            .create_async()
            .await;
        let gone_mock = server
            .mock("GET", "/gone.jpg")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = FetcherConfig::builder()
            .images_dir(dir.path().join("images"))
            .build();
        let fetcher = HttpFetcher::new(config).unwrap();

        let url = format!("{}/", server.url());
        let page = fetcher.scrape(&url).await.unwrap();

        assert_eq!(page.title, "Shop");
        assert_eq!(page.images.len(), 2);

        let logo = &page.images[0];
        let path = logo.local_path.as_ref().unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_logo.png"));
        assert_eq!(std::fs::read(path).unwrap(), vec![137u8, 80, 78, 71]);

        let gone = &page.images[1];
        assert!(gone.local_path.is_none());
        assert!(gone.error.is_some());

        page_mock.assert_async().await;
        logo_mock.assert_async().await;
        gone_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_same_basename_images_get_distinct_files() {
        let mut server = Server::new_async().await;
        let html = r#"<html><body>
            <img src="/a/logo.png" alt="first">
            <img src="/b/logo.png" alt="second">
        </body></html>"#;
        let _page = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(html)
            .create_async()
            .await;
        let _a = server
            .mock("GET", "/a/logo.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body("AAAA")
            .create_async()
            .await;
        let _b = server
            .mock("GET", "/b/logo.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body("BBBB")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = FetcherConfig::builder().images_dir(dir.path()).build();
        let fetcher = HttpFetcher::new(config).unwrap();

        let page = fetcher.scrape(&format!("{}/", server.url())).await.unwrap();
        assert_eq!(page.images.len(), 2);

        let a = page.images[0].local_path.as_ref().unwrap();
        let b = page.images[1].local_path.as_ref().unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read(a).unwrap(), b"AAAA");
        assert_eq!(std::fs::read(b).unwrap(), b"BBBB");
    }

    #[tokio::test]
    async fn test_scrape_fails_on_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = FetcherConfig::builder().images_dir(dir.path()).build();
        let fetcher = HttpFetcher::new(config).unwrap();

        let result = fetcher.scrape(&format!("{}/", server.url())).await;
        assert!(matches!(result, Err(FetchError::Http(_))));
    }
}
