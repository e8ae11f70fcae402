//! Content extraction functionality for the fetcher module

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::document::ImageRef;
use crate::fetcher::FetcherConfig;
use crate::fetcher::error::FetchError;

const MAX_META_CHARS: usize = 200;
const MAX_HEADING_CHARS: usize = 100;
const MAX_PARAGRAPH_CHARS: usize = 200;
const MIN_PARAGRAPH_CHARS: usize = 50;

/// Everything pulled out of the HTML, before images are downloaded
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub title: String,
    pub meta_tags: BTreeMap<String, String>,
    pub headings: BTreeMap<String, Vec<String>>,
    pub paragraphs: Vec<String>,
    pub images: Vec<ImageRef>,
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css)
        .map_err(|e| FetchError::HtmlParse(format!("Failed to parse selector '{}': {}", css, e)))
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Visible text of an element with whitespace collapsed
fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract the SEO relevant fields of a page
///
/// # Arguments
///
/// * `url` - The URL the HTML was fetched from, used to resolve image sources
/// * `html` - The HTML of the page
/// * `config` - Limits to apply
pub fn extract_page(url: &str, html: &str, config: &FetcherConfig) -> Result<ExtractedPage, FetchError> {
    let base = Url::parse(url)?;
    let document = Html::parse_document(html);

    let title = document
        .select(&selector("title")?)
        .next()
        .map(|element| element_text(&element))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| "No title found".to_string());

    let mut meta_tags = BTreeMap::new();
    for element in document.select(&selector("meta")?) {
        let attrs = element.value();
        let name = attrs.attr("name").or_else(|| attrs.attr("property"));
        if let (Some(name), Some(content)) = (name, attrs.attr("content")) {
            if !name.is_empty() && !content.trim().is_empty() {
                meta_tags.insert(name.to_string(), truncate_chars(content.trim(), MAX_META_CHARS));
            }
        }
    }

    let mut headings = BTreeMap::new();
    for level in ["h1", "h2", "h3", "h4", "h5", "h6"] {
        let texts: Vec<String> = document
            .select(&selector(level)?)
            .take(config.max_headings_per_level)
            .map(|element| element_text(&element))
            .filter(|text| !text.is_empty())
            .map(|text| truncate_chars(&text, MAX_HEADING_CHARS))
            .collect();
        if !texts.is_empty() {
            headings.insert(level.to_string(), texts);
        }
    }

    let paragraphs = document
        .select(&selector("p")?)
        .take(config.max_paragraphs)
        .map(|element| truncate_chars(&element_text(&element), MAX_PARAGRAPH_CHARS))
        .filter(|text| text.chars().count() > MIN_PARAGRAPH_CHARS)
        .collect();

    let mut images = Vec::new();
    for element in document.select(&selector("img")?).take(config.max_images) {
        let attrs = element.value();
        let Some(src) = attrs.attr("src").map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        match base.join(src) {
            Ok(resolved) => images.push(ImageRef {
                remote_url: resolved.to_string(),
                local_path: None,
                alt_text: attrs.attr("alt").unwrap_or_default().to_string(),
                title: attrs.attr("title").unwrap_or_default().to_string(),
                error: None,
            }),
            Err(e) => debug!("Skipping image with unresolvable src '{}': {}", src, e),
        }
    }

    Ok(ExtractedPage {
        title,
        meta_tags,
        headings,
        paragraphs,
        images,
    })
}
