//! Chat backends reached through the `llm` crate

use std::collections::HashMap;

use async_trait::async_trait;
use llm::builder::{LLMBackend, LLMBuilder};
use serde::{Deserialize, Serialize};

use dialogue_core::{
    ChatMessage, FinishReason, LLMConfig, LLMError, LLMProvider, LLMResponse, Role, TokenUsage,
};

/// Backends a provider entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAI,
    Anthropic,
    Ollama,
    DeepSeek,
    Google,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::DeepSeek => "deepseek",
            Self::Google => "google",
        }
    }

    /// Environment variable read when an entry carries no key of its own.
    /// Local backends need none.
    fn key_env_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Google => Some("GOOGLE_API_KEY"),
            Self::Ollama => None,
        }
    }

    fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::Ollama => Some("http://localhost:11434"),
            _ => None,
        }
    }

    fn llm_backend(&self) -> LLMBackend {
        match self {
            Self::OpenAI => LLMBackend::OpenAI,
            Self::Anthropic => LLMBackend::Anthropic,
            Self::Ollama => LLMBackend::Ollama,
            Self::DeepSeek => LLMBackend::DeepSeek,
            Self::Google => LLMBackend::Google,
        }
    }
}

/// One entry under `providers:` in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: BackendKind,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Name of the variable holding the key, overriding the backend default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderSettings {
    pub fn new(provider: BackendKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn build(&self) -> Result<ChatBackend, LLMError> {
        if self.model.trim().is_empty() {
            return Err(LLMError::Config(format!(
                "{} provider needs a model",
                self.provider.name()
            )));
        }

        Ok(ChatBackend {
            kind: self.provider,
            model: self.model.clone(),
            api_key: self.resolve_api_key()?,
            base_url: self
                .base_url
                .clone()
                .or_else(|| self.provider.default_base_url().map(str::to_string)),
            defaults: LLMConfig {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                top_p: None,
            },
        })
    }

    fn resolve_api_key(&self) -> Result<Option<String>, LLMError> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }

        let env_var = match (&self.api_key_env, self.provider.key_env_var()) {
            (Some(name), _) => name.as_str(),
            (None, Some(name)) => name,
            (None, None) => return Ok(None),
        };
        std::env::var(env_var).map(Some).map_err(|_| {
            LLMError::Config(format!(
                "{} provider needs an API key, set {}",
                self.provider.name(),
                env_var
            ))
        })
    }
}

#[derive(Debug)]
pub struct ChatBackend {
    kind: BackendKind,
    model: String,
    api_key: Option<String>,
    base_url: Option<String>,
    defaults: LLMConfig,
}

impl ChatBackend {
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Per-call settings win over the entry's defaults, field by field.
    fn effective_config(&self, config: Option<&LLMConfig>) -> LLMConfig {
        let Some(config) = config else {
            return self.defaults.clone();
        };
        LLMConfig {
            temperature: config.temperature.or(self.defaults.temperature),
            max_tokens: config.max_tokens.or(self.defaults.max_tokens),
            top_p: config.top_p.or(self.defaults.top_p),
        }
    }

    fn build_llm(
        &self,
        system: Option<String>,
        config: &LLMConfig,
    ) -> Result<Box<dyn llm::LLMProvider>, LLMError> {
        let mut builder = LLMBuilder::new()
            .backend(self.kind.llm_backend())
            .model(&self.model);

        if let Some(key) = &self.api_key {
            builder = builder.api_key(key);
        }
        if let Some(url) = &self.base_url {
            builder = builder.base_url(url);
        }
        if let Some(system) = system {
            builder = builder.system(system);
        }
        if let Some(temperature) = config.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = config.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        if let Some(top_p) = config.top_p {
            builder = builder.top_p(top_p);
        }

        builder.build().map_err(|e| {
            LLMError::Config(format!("Failed to build {} backend: {}", self.kind.name(), e))
        })
    }
}

/// System messages become the backend's system prompt. Everything else is a
/// chat turn, with unrecognised roles sent as the user.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let (system, turns): (Vec<&ChatMessage>, Vec<&ChatMessage>) =
        messages.iter().partition(|m| m.role == Role::System);

    let system = if system.is_empty() {
        None
    } else {
        Some(
            system
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    };
    (system, turns)
}

fn to_llm_message(message: &ChatMessage) -> llm::chat::ChatMessage {
    match message.role {
        Role::Assistant => llm::chat::ChatMessage::assistant()
            .content(&message.content)
            .build(),
        _ => llm::chat::ChatMessage::user().content(&message.content).build(),
    }
}

#[async_trait]
impl LLMProvider for ChatBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, LLMError> {
        let (system, turns) = split_system(messages);
        let turns: Vec<llm::chat::ChatMessage> = turns.into_iter().map(to_llm_message).collect();

        let llm = self.build_llm(system, &self.effective_config(config))?;
        let response = llm.chat(&turns).await.map_err(|e| LLMError::API {
            message: format!("{} backend error: {}", self.kind.name(), e),
            status: None,
        })?;

        let content = response.text().unwrap_or_default();
        let finish_reason = if content.trim().is_empty() {
            FinishReason::Other
        } else {
            FinishReason::Stop
        };
        let usage = response.usage().map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(LLMResponse {
            content,
            finish_reason,
            usage,
            model: Some(self.model.clone()),
            metadata: HashMap::new(),
        })
    }

    fn provider_name(&self) -> &str {
        self.kind.name()
    }
}
