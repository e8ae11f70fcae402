//! HTTP client for OpenAI-compatible chat completion APIs
//!
//! Talks to Groq by default. The client never retries on its own: a 429 (or a
//! provider error body mentioning token limits) is surfaced as an error whose
//! message the stage-level retry policy recognises.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode};
use tracing::{debug, error, instrument};

use crate::llm::error::LlmError;
use crate::llm::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use crate::llm::{CompletionRequest, ImagePayload, ReasoningClient};

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Seconds suggested to callers when a 429 carries no `retry-after` header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Options for the chat client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL for API requests
    pub base_url: String,

    /// Timeout for each request
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Chat completion client
#[derive(Clone)]
pub struct ChatClient {
    /// The underlying reqwest client
    client: ReqwestClient,

    /// Base URL for API requests
    base_url: String,

    /// Bearer token
    api_key: String,
}

#[cfg(test)]
impl ChatClient {
    /// Set the base URL (for testing only)
    pub fn set_base_url(&mut self, url: String) {
        self.base_url = url;
    }
}

impl ChatClient {
    /// Create a client with default options
    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self, LlmError> {
        Self::with_api_key_and_options(api_key, ClientOptions::default())
    }

    /// Create a client with custom options
    pub fn with_api_key_and_options(
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, LlmError> {
        let client = ReqwestClient::builder().timeout(options.timeout).build()?;
        Ok(Self {
            client,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Send a chat completion request and return the reply text
    #[instrument(skip(self, request), fields(model = %request.model), level = "debug")]
    pub async fn chat(&self, request: &ChatCompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("Sending chat completion with {} messages", request.messages.len());

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let response_text = response.text().await?;

        if status.is_success() {
            let parsed: ChatCompletionResponse = serde_json::from_str(&response_text).map_err(|e| {
                error!("Failed to parse response: {}", e);
                LlmError::UnexpectedResponse(format!("Failed to parse response: {}", e))
            })?;
            return parsed
                .text()
                .ok_or_else(|| LlmError::UnexpectedResponse("response has no content".to_string()));
        }

        error!("API error: {} - {}", status, response_text);
        match status {
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimit {
                retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(LlmError::Auth("Invalid API key or credentials".to_string()))
            }
            _ => Err(LlmError::Api {
                status_code: status.as_u16(),
                message: response_text,
            }),
        }
    }
}

#[async_trait]
impl ReasoningClient for ChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![
                ChatMessage::system(&request.system_prompt),
                ChatMessage::user(&request.user_prompt),
            ],
            max_tokens: request.max_tokens,
        };
        self.chat(&body).await
    }

    async fn complete_with_image(
        &self,
        request: &CompletionRequest,
        image: &ImagePayload,
    ) -> Result<String, LlmError> {
        let body = ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![
                ChatMessage::system(&request.system_prompt),
                ChatMessage::user_with_image(
                    &request.user_prompt,
                    &image.data_url,
                    Some("high".to_string()),
                ),
            ],
            max_tokens: request.max_tokens,
        };
        self.chat(&body).await
    }
}
