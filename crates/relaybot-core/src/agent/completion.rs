use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{BotConfig, ProviderConfig};
use crate::error::ProviderError;
use crate::provider::LlmProvider;
use crate::types::{FinishReason, TokenUsage, Turn};

use super::context::ContextBuilder;

/// Result of asking the model for a reply.
///
/// Failures are carried as data so callers always have text to send.
#[derive(Debug)]
pub enum Completion {
    /// Trimmed text of the first choice.
    Generated {
        text: String,
        finish_reason: FinishReason,
        usage: TokenUsage,
    },
    /// The configured fallback text, plus what went wrong.
    Fallback { text: String, error: ProviderError },
}

impl Completion {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Completion::Fallback { .. })
    }

    pub fn into_text(self) -> String {
        match self {
            Completion::Generated { text, .. } => text,
            Completion::Fallback { text, .. } => text,
        }
    }
}

/// Wraps an `LlmProvider` with a fixed model, temperature, system prompt and fallback.
pub struct CompletionClient {
    provider: Arc<dyn LlmProvider>,
    context: ContextBuilder,
    model: String,
    temperature: f64,
    fallback_reply: String,
}

impl CompletionClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        context: ContextBuilder,
        model: impl Into<String>,
        temperature: f64,
        fallback_reply: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            context,
            model: model.into(),
            temperature,
            fallback_reply: fallback_reply.into(),
        }
    }

    pub fn from_config(
        provider: Arc<dyn LlmProvider>,
        provider_config: &ProviderConfig,
        bot: &BotConfig,
    ) -> Self {
        Self::new(
            provider,
            ContextBuilder::new(&bot.system_prompt),
            &provider_config.model,
            provider_config.temperature,
            &bot.fallback_reply,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model to continue `history`. Never fails.
    pub async fn complete(&self, history: &[Turn]) -> Completion {
        let messages = self.context.build_messages(history);

        let resp = match self
            .provider
            .chat(&messages, &self.model, self.temperature)
            .await
        {
            Ok(resp) => resp,
            Err(error) => return self.fallback(error),
        };

        let text = match resp.content.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => return self.fallback(ProviderError::Parse("Empty completion content".to_string())),
        };

        if resp.finish_reason == FinishReason::Length {
            warn!(
                "Reply from {} was cut at the token limit ({} completion tokens)",
                self.model, resp.usage.completion_tokens
            );
        }
        debug!(
            "Completion used {} tokens ({} prompt, {} completion)",
            resp.usage.total_tokens, resp.usage.prompt_tokens, resp.usage.completion_tokens
        );

        Completion::Generated {
            text,
            finish_reason: resp.finish_reason,
            usage: resp.usage,
        }
    }

    fn fallback(&self, error: ProviderError) -> Completion {
        Completion::Fallback {
            text: self.fallback_reply.clone(),
            error,
        }
    }
}
