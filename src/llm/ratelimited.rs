use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{Instrument, debug_span, info_span};

use crate::llm::error::LlmError;
use crate::llm::{CompletionRequest, ImagePayload, ReasoningClient};

/// Client-side request quota in front of a reasoning client
#[derive(Clone)]
pub struct RateLimitedClient<C: ReasoningClient> {
    inner: C,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl<C> RateLimitedClient<C>
where
    C: ReasoningClient,
{
    pub fn new(inner: C, limiter: DefaultDirectRateLimiter) -> Self {
        Self {
            inner,
            limiter: Arc::new(limiter),
        }
    }

    pub fn per_minute(inner: C, requests_per_minute: NonZeroU32) -> Self {
        Self::new(inner, RateLimiter::direct(Quota::per_minute(requests_per_minute)))
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: ReasoningClient> ReasoningClient for RateLimitedClient<C> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.limiter.until_ready().instrument(debug_span!("limiter")).await;
        self.inner
            .complete(request)
            .instrument(info_span!("completion", model = %request.model))
            .await
    }

    async fn complete_with_image(
        &self,
        request: &CompletionRequest,
        image: &ImagePayload,
    ) -> Result<String, LlmError> {
        self.limiter.until_ready().instrument(debug_span!("limiter")).await;
        self.inner
            .complete_with_image(request, image)
            .instrument(info_span!("vision_completion", model = %request.model))
            .await
    }
}
