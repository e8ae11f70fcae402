//! # Reasoning Service Client
//!
//! Everything the analysis stages need to talk to a hosted LLM: the
//! `ReasoningClient` seam, an OpenAI-compatible HTTP implementation, a
//! governor-backed request quota wrapper and a scriptable mock for tests.
//!
//! ## Key Components
//!
//! - `ReasoningClient`: text and vision completions
//! - `ChatClient`: `POST {base}/chat/completions` over reqwest
//! - `RateLimitedClient`: client-side requests-per-minute quota
//! - `mock::MockReasoningClient`: scripted replies and call recording

mod client;
mod error;
pub mod mock;
mod ratelimited;
pub mod types;

pub use client::{ChatClient, ClientOptions, DEFAULT_BASE_URL};
pub use error::LlmError;
pub use ratelimited::RateLimitedClient;

use async_trait::async_trait;

/// One prompt for the reasoning service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_tokens,
        }
    }
}

/// Image bytes encoded for a vision request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// `data:<mime>;base64,<bytes>`
    pub data_url: String,
}

impl ImagePayload {
    pub fn from_base64(mime_type: &str, encoded: &str) -> Self {
        Self {
            data_url: format!("data:{mime_type};base64,{encoded}"),
        }
    }
}

/// A hosted reasoning service
///
/// Implementations return the reply text. Rate limiting is reported through
/// the error message; retrying is the caller's decision.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    async fn complete_with_image(
        &self,
        request: &CompletionRequest,
        image: &ImagePayload,
    ) -> Result<String, LlmError>;
}

#[async_trait]
impl<C: ReasoningClient + ?Sized> ReasoningClient for std::sync::Arc<C> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        (**self).complete(request).await
    }

    async fn complete_with_image(
        &self,
        request: &CompletionRequest,
        image: &ImagePayload,
    ) -> Result<String, LlmError> {
        (**self).complete_with_image(request, image).await
    }
}
