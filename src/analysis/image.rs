//! Image analysis: per-image vision descriptions plus one aggregate request

use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::analysis::prompts;
use crate::analysis::{StageContext, StageError, StageOutcome};
use crate::config::StageModels;
use crate::document::{AnalysisResult, ImageDescription, ImageRef, SeoDocument, StageName};
use crate::llm::{CompletionRequest, ImagePayload, ReasoningClient};
use crate::storage::Storage;

/// Hard cap on images sent with their bytes
pub const MAX_VISION_IMAGES: usize = 2;

/// Output cap for one image description
pub const DESCRIPTION_MAX_TOKENS: u32 = 50;

/// Output cap for the aggregate image request
pub const IMAGE_MAX_TOKENS: u32 = 100;

/// Stored in place of a description the service could not produce
pub const DESCRIPTION_PLACEHOLDER: &str = "Error generating description";

/// The first `MAX_VISION_IMAGES` images, in document order, that have a local
/// file of a vision-supported type.
pub fn select_vision_images(images: &[ImageRef]) -> Vec<&ImageRef> {
    images
        .iter()
        .filter(|image| image.is_vision_type())
        .take(MAX_VISION_IMAGES)
        .collect()
}

/// Metadata sent in the aggregate request; never carries image bytes
#[derive(Serialize)]
struct ImageMetadata<'a> {
    url: &'a str,
    alt: &'a str,
    title: &'a str,
    local_path: Option<&'a Path>,
}

/// Read the image's local file into a base64 data URL
pub async fn encode_image(image: &ImageRef) -> std::io::Result<ImagePayload> {
    let path = image.local_path.as_deref().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "image was not downloaded")
    })?;
    let bytes = tokio::fs::read(path).await?;
    Ok(ImagePayload::from_base64(image.mime_type(), &STANDARD.encode(bytes)))
}

/// Image stage
#[derive(Debug, Clone)]
pub struct ImageStage {
    vision_model: String,
    text_model: String,
}

impl ImageStage {
    pub fn new(models: &StageModels) -> Self {
        Self {
            vision_model: models.vision.clone(),
            text_model: models.text.clone(),
        }
    }

    #[instrument(skip_all, fields(stage = "image"))]
    pub async fn run<R, S>(
        &self,
        document: &mut SeoDocument,
        ctx: &StageContext<'_, R, S>,
    ) -> StageOutcome
    where
        R: ReasoningClient,
        S: Storage,
    {
        let selected: Vec<ImageRef> = select_vision_images(&document.images)
            .into_iter()
            .cloned()
            .collect();
        info!(
            "{} of {} images eligible for vision analysis",
            selected.len(),
            document.images.len()
        );

        let mut descriptions = Vec::with_capacity(selected.len());
        for image in &selected {
            let payload = match encode_image(image).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Skipping image {}: {}", image.remote_url, e);
                    ctx.log(
                        StageName::Image,
                        &format!("Failed to read image {}: {}", image.remote_url, e),
                    )
                    .await;
                    continue;
                }
            };

            ctx.pace(StageName::Image).await;
            let description = self.describe(image, &payload, ctx).await;
            descriptions.push(ImageDescription {
                url: image.remote_url.clone(),
                description,
            });
        }
        document.image_descriptions = descriptions;

        ctx.pace(StageName::Image).await;
        let result = match self.metadata_request(&selected) {
            Ok(request) => ctx
                .complete(StageName::Image, &request)
                .await
                .map(AnalysisResult::text),
            Err(e) => Err(e),
        };

        ctx.settle(document, StageName::Image, result).await
    }

    /// One description; failures become the placeholder
    async fn describe<R, S>(
        &self,
        image: &ImageRef,
        payload: &ImagePayload,
        ctx: &StageContext<'_, R, S>,
    ) -> String
    where
        R: ReasoningClient,
        S: Storage,
    {
        let request = CompletionRequest::new(
            &self.vision_model,
            prompts::IMAGE_SYSTEM,
            prompts::image_description(image),
            DESCRIPTION_MAX_TOKENS,
        );

        match ctx.client.complete_with_image(&request, payload).await {
            Ok(reply) => {
                let line = reply.lines().next().unwrap_or_default().trim().to_string();
                debug!("Described {}: {}", image.remote_url, line);
                line
            }
            Err(e) => {
                warn!("Failed to describe {}: {}", image.remote_url, e);
                ctx.log(
                    StageName::Image,
                    &format!("Failed to get image description: {e}"),
                )
                .await;
                DESCRIPTION_PLACEHOLDER.to_string()
            }
        }
    }

    fn metadata_request(&self, images: &[ImageRef]) -> Result<CompletionRequest, StageError> {
        let metadata: Vec<ImageMetadata<'_>> = images
            .iter()
            .map(|image| ImageMetadata {
                url: &image.remote_url,
                alt: &image.alt_text,
                title: &image.title,
                local_path: image.local_path.as_deref(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| StageError::Payload(e.to_string()))?;

        Ok(CompletionRequest::new(
            &self.text_model,
            prompts::IMAGE_SYSTEM,
            prompts::image_metadata(&json),
            IMAGE_MAX_TOKENS,
        ))
    }
}
