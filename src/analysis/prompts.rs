//! Prompt builders for the analysis stages and the final report
//!
//! Every prompt embeds only data already present in the document, serialized
//! as JSON, and asks for referenced facts rather than generic advice.

use crate::document::ImageRef;

pub const CONTENT_SYSTEM: &str = "You are an expert SEO content analyst.";
pub const IMAGE_SYSTEM: &str = "You are an expert image SEO analyst.";
pub const KEYWORD_SYSTEM: &str = "You are an expert keyword analyst.";
pub const BACKLINK_SYSTEM: &str = "You are an expert backlink SEO analyst.";
pub const URL_SYSTEM: &str = "You are an expert URL SEO analyst.";
pub const REPORT_SYSTEM: &str = "You are an expert SEO report generator.";

pub fn content(json: &str) -> String {
    format!(
        "Analyze the following scraped content for structure, readability, and optimization. \
Use only the data provided below. Output must be factual, numerical, and reference the JSON keys. Cover:
- Heading hierarchy and content organization
- Readability metrics
- Content gaps and opportunities
- Actionable recommendations, each referenced to the JSON

JSON: {json}"
    )
}

pub fn keyword(json: &str) -> String {
    format!(
        "From the JSON, extract all keywords and their frequencies. Output ONLY:
- A markdown table: | Keyword | Frequency | (reference JSON)
- A list of keywords missing compared to the top 5 competitors (if available).
- No generic advice. Only reference the data provided.
JSON: {json}"
    )
}

pub fn backlink(json: &str) -> String {
    format!(
        "Analyze all backlinks in the JSON. Output ONLY:
- A markdown table: | Backlink URL | Domain Authority | Relevance | (reference JSON)
- A count of low-quality backlinks.
- No generic advice. Only reference the data provided.
JSON: {json}"
    )
}

pub fn url(json: &str) -> String {
    format!(
        "Analyze all URLs in the JSON. Output ONLY:
- A markdown table: | URL | Depth | Is SEO-Friendly? | (reference JSON)
- A count of non-SEO-friendly URLs.
- No generic advice. Only reference the data provided.
JSON: {json}"
    )
}

/// One-line description request sent alongside the image bytes
pub fn image_description(image: &ImageRef) -> String {
    format!(
        "Given the following image and its metadata, provide a single, concise, factual one-line \
description of the image content for SEO purposes. Do not include generic advice. \
Only output the description, nothing else.

Metadata:
- URL: {}
- Alt: {}
- Title: {}
- File Type: {}",
        image.remote_url,
        image.alt_text,
        image.title,
        image.mime_type()
    )
}

/// Scoring request over image metadata, without any image bytes
pub fn image_metadata(json: &str) -> String {
    format!(
        "Analyze the image metadata for SEO optimization. Output ONLY:
- A markdown table: | Image | Alt Text Present? | File Type | SEO Score |
- A count of images missing alt text.
- Basic SEO recommendations based on file types and metadata.
- No generic advice. Only reference the data provided.

Image Data: {json}"
    )
}

pub fn report(json: &str) -> String {
    format!(
        "Generate a brief SEO analysis report using only the provided JSON data and the analyses it \
contains. Respond with a single JSON object with these keys:
- \"executive_summary\": 2-3 sentences
- \"priority_action_plan\": the 3 most important actions
- \"overall_seo_score\": a number from 1 to 10
No generic advice. Only reference the JSON data.

JSON: {json}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_embed_payload() {
        let json = r#"{"url":"https://example.com"}"#;
        for prompt in [content(json), keyword(json), backlink(json), url(json), report(json)] {
            assert!(prompt.ends_with(json));
        }
    }

    #[test]
    fn test_image_description_includes_metadata() {
        let mut image = ImageRef::new("https://example.com/logo.png");
        image.alt_text = "Company logo".to_string();
        image.local_path = Some("images/logo.png".into());

        let prompt = image_description(&image);
        assert!(prompt.contains("- URL: https://example.com/logo.png"));
        assert!(prompt.contains("- Alt: Company logo"));
        assert!(prompt.contains("- File Type: image/png"));
    }
}
