//! LLM provider traits

use async_trait::async_trait;
use thiserror::Error;

use crate::message::ChatMessage;
use crate::types::{LLMConfig, LLMResponse};

/// Core LLM provider trait
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, LLMError>;

    fn provider_name(&self) -> &str;
}

/// Resolves provider identifiers to completions.
///
/// This is the seam the compaction engine talks to: it only knows provider
/// ids, never concrete providers.
#[async_trait]
pub trait ProviderRouter: Send + Sync {
    /// Generate a completion for `prompt` with the provider registered as
    /// `provider_id`. `contexts` are prior messages sent ahead of the prompt.
    async fn generate(
        &self,
        provider_id: &str,
        prompt: &str,
        contexts: &[ChatMessage],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, LLMError>;

    /// The provider id the given origin currently chats with, if any.
    async fn current_provider_id(&self, origin: &str) -> Result<Option<String>, LLMError>;
}

/// LLM error types
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("API error: {message}")]
    API {
        message: String,
        status: Option<u16>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {retry_after:?}")]
    RateLimit {
        retry_after: Option<std::time::Duration>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for LLMError {
    fn from(err: serde_json::Error) -> Self {
        LLMError::Other(format!("Serialization error: {}", err))
    }
}
