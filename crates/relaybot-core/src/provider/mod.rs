pub mod openai_compat;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{CompletionResponse, Turn};

pub use openai_compat::OpenAiCompatProvider;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    async fn chat(
        &self,
        messages: &[Turn],
        model: &str,
        temperature: f64,
    ) -> Result<CompletionResponse, ProviderError>;
}
