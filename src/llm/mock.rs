//! # Mock Reasoning Client for Testing
//!
//! Provides a `MockReasoningClient` that implements `ReasoningClient` without
//! making any network calls. Replies can be scripted in order, and rules can
//! fail every request matching a predicate (e.g. "all image requests") to
//! simulate a stage that never gets past a rate limit.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::error::LlmError;
use crate::llm::{CompletionRequest, ImagePayload, ReasoningClient};

/// A scripted reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Text(String),
    /// Fails with an API error carrying this message
    Error(String),
}

impl MockReply {
    fn into_result(self) -> Result<String, LlmError> {
        match self {
            MockReply::Text(text) => Ok(text),
            MockReply::Error(message) => Err(LlmError::Api {
                status_code: 500,
                message,
            }),
        }
    }
}

/// A request seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub request: CompletionRequest,
    pub image: Option<ImagePayload>,
}

type Predicate = Box<dyn Fn(&CompletionRequest) -> bool + Send + Sync>;

#[derive(Default)]
struct MockState {
    rules: Vec<(Predicate, MockReply)>,
    queue: VecDeque<MockReply>,
    default_reply: Option<String>,
    calls: Vec<RecordedCall>,
}

/// A mock reasoning client for testing purposes.
///
/// Resolution order for each call: the first matching rule, then the next
/// queued reply, then the default reply (empty text unless set).
#[derive(Clone, Default)]
pub struct MockReasoningClient {
    state: Arc<Mutex<MockState>>,
}

impl MockReasoningClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply
    pub async fn push_text(&self, text: &str) {
        self.state
            .lock()
            .await
            .queue
            .push_back(MockReply::Text(text.to_string()));
    }

    /// Queue a failing reply
    pub async fn push_error(&self, message: &str) {
        self.state
            .lock()
            .await
            .queue
            .push_back(MockReply::Error(message.to_string()));
    }

    /// Reply used when no rule matches and the queue is empty
    pub async fn set_default_text(&self, text: &str) {
        self.state.lock().await.default_reply = Some(text.to_string());
    }

    /// Answer every request matching `predicate` with `reply`
    pub async fn add_rule<P>(&self, predicate: P, reply: MockReply)
    where
        P: Fn(&CompletionRequest) -> bool + Send + Sync + 'static,
    {
        self.state
            .lock()
            .await
            .rules
            .push((Box::new(predicate), reply));
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().await.calls.clone()
    }

    async fn respond(
        &self,
        request: &CompletionRequest,
        image: Option<&ImagePayload>,
    ) -> Result<String, LlmError> {
        let mut state = self.state.lock().await;
        state.calls.push(RecordedCall {
            request: request.clone(),
            image: image.cloned(),
        });

        let reply = state
            .rules
            .iter()
            .find(|(predicate, _)| predicate(request))
            .map(|(_, reply)| reply.clone())
            .or_else(|| state.queue.pop_front())
            .unwrap_or_else(|| MockReply::Text(state.default_reply.clone().unwrap_or_default()));

        reply.into_result()
    }
}

#[async_trait]
impl ReasoningClient for MockReasoningClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.respond(request, None).await
    }

    async fn complete_with_image(
        &self,
        request: &CompletionRequest,
        image: &ImagePayload,
    ) -> Result<String, LlmError> {
        self.respond(request, Some(image)).await
    }
}
