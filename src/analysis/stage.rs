//! The generic text analysis stage (content, keyword, backlink, url)

use tracing::{info, instrument};

use crate::analysis::prompts;
use crate::analysis::{StageContext, StageError, StageOutcome};
use crate::config::StageModels;
use crate::document::{AnalysisResult, SeoDocument, StageName};
use crate::llm::{CompletionRequest, ReasoningClient};
use crate::storage::Storage;

/// Output cap for the text stages
pub const STAGE_MAX_TOKENS: u32 = 1000;

/// One text-only analysis step; stages differ only in prompt and model
#[derive(Debug, Clone)]
pub struct AnalysisStage {
    name: StageName,
    model: String,
    system_prompt: &'static str,
    build_prompt: fn(&str) -> String,
    max_tokens: u32,
}

impl AnalysisStage {
    pub fn content(models: &StageModels) -> Self {
        Self::new(StageName::Content, &models.text, prompts::CONTENT_SYSTEM, prompts::content)
    }

    pub fn keyword(models: &StageModels) -> Self {
        Self::new(StageName::Keyword, &models.keyword, prompts::KEYWORD_SYSTEM, prompts::keyword)
    }

    pub fn backlink(models: &StageModels) -> Self {
        Self::new(StageName::Backlink, &models.text, prompts::BACKLINK_SYSTEM, prompts::backlink)
    }

    pub fn url(models: &StageModels) -> Self {
        Self::new(StageName::Url, &models.text, prompts::URL_SYSTEM, prompts::url)
    }

    /// The text stage for `name`, if it is one
    pub fn for_name(name: StageName, models: &StageModels) -> Option<Self> {
        match name {
            StageName::Content => Some(Self::content(models)),
            StageName::Keyword => Some(Self::keyword(models)),
            StageName::Backlink => Some(Self::backlink(models)),
            StageName::Url => Some(Self::url(models)),
            _ => None,
        }
    }

    fn new(
        name: StageName,
        model: &str,
        system_prompt: &'static str,
        build_prompt: fn(&str) -> String,
    ) -> Self {
        Self {
            name,
            model: model.to_string(),
            system_prompt,
            build_prompt,
            max_tokens: STAGE_MAX_TOKENS,
        }
    }

    pub fn name(&self) -> StageName {
        self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The request this stage sends for `document`
    pub fn request(&self, document: &SeoDocument) -> Result<CompletionRequest, StageError> {
        let payload = document
            .source_json()
            .map_err(|e| StageError::Payload(e.to_string()))?;
        Ok(CompletionRequest::new(
            &self.model,
            self.system_prompt,
            (self.build_prompt)(&payload),
            self.max_tokens,
        ))
    }

    /// Pace, call the reasoning service under the retry policy, record and persist.
    #[instrument(skip_all, fields(stage = %self.name))]
    pub async fn run<R, S>(
        &self,
        document: &mut SeoDocument,
        ctx: &StageContext<'_, R, S>,
    ) -> StageOutcome
    where
        R: ReasoningClient,
        S: Storage,
    {
        ctx.pace(self.name).await;

        let result = match self.request(document) {
            Ok(request) => ctx
                .complete(self.name, &request)
                .await
                .map(AnalysisResult::text),
            Err(e) => Err(e),
        };

        let outcome = ctx.settle(document, self.name, result).await;
        if outcome.is_success() {
            info!("{} analysis completed", self.name);
        }
        outcome
    }
}
