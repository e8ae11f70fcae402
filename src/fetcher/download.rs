//! Image download for the fetcher module
//!
//! Every discovered image is downloaded next to the analysis output. A broken
//! image never fails the scrape: the entry is kept with `local_path = None`
//! and the error recorded on it.

use std::path::{Path, PathBuf};

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;

use crate::document::ImageRef;
use crate::fetcher::error::FetchError;

/// Characters that are not allowed in file names on common platforms
const INVALID_FILENAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if INVALID_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Extension for a `Content-Type` header value, e.g. `image/webp` -> `webp`
fn extension_for_content_type(content_type: &str) -> Option<String> {
    let mime = content_type.split(';').next()?.trim();
    let subtype = mime.strip_prefix("image/")?;
    let subtype = subtype.split('+').next()?.trim();
    (!subtype.is_empty()).then(|| subtype.to_ascii_lowercase())
}

/// File name for a downloaded image
///
/// Uses the last path segment of the image URL (or `image_<index>`), replaces
/// invalid characters and makes sure there is an extension.
pub fn image_file_name(remote_url: &str, index: usize, content_type: Option<&str>) -> String {
    let original = Url::parse(remote_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| !segment.is_empty())
        .unwrap_or_else(|| format!("image_{index}"));

    let mut name = sanitize_filename(&original);
    if Path::new(&name).extension().is_none() {
        let ext = content_type
            .and_then(extension_for_content_type)
            .unwrap_or_else(|| "png".to_string());
        name.push('.');
        name.push_str(&ext);
    }
    name
}

async fn download_one(
    client: &Client,
    images_dir: &Path,
    stem: &str,
    index: usize,
    image: &ImageRef,
) -> Result<PathBuf, FetchError> {
    let response = client
        .get(&image.remote_url)
        .send()
        .await?
        .error_for_status()?;

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await?;

    let file_name = image_file_name(&image.remote_url, index, content_type.as_deref());
    let path = images_dir.join(format!("{stem}_{index}_{file_name}"));
    tokio::fs::write(&path, &bytes).await?;

    debug!("Downloaded {} ({} bytes) to {}", image.remote_url, bytes.len(), path.display());
    Ok(path)
}

/// Download all images, keeping order and recording per-image failures
///
/// Local names carry the image's position, so two images sharing a basename
/// never share a file.
pub async fn download_images(
    client: &Client,
    images_dir: &Path,
    stem: &str,
    images: Vec<ImageRef>,
) -> Vec<ImageRef> {
    if let Err(e) = tokio::fs::create_dir_all(images_dir).await {
        warn!("Cannot create images directory {}: {}", images_dir.display(), e);
        let message = e.to_string();
        return images
            .into_iter()
            .map(|mut image| {
                image.error = Some(message.clone());
                image
            })
            .collect();
    }

    let mut downloaded = Vec::with_capacity(images.len());
    for (index, mut image) in images.into_iter().enumerate() {
        match download_one(client, images_dir, stem, index, &image).await {
            Ok(path) => image.local_path = Some(path),
            Err(e) => {
                warn!("Image download error: {} for image {}", e, index);
                image.local_path = None;
                image.error = Some(e.to_string());
            }
        }
        downloaded.push(image);
    }
    downloaded
}
