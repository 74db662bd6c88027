use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use dialogue_core::{ChatMessage, LLMConfig, LLMError, LLMProvider, LLMResponse, ProviderRouter};

#[derive(Clone)]
pub struct LLMRegistry {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    default_alias: String,
    origin_aliases: HashMap<String, String>,
}

impl std::fmt::Debug for LLMRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LLMRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("default_alias", &self.default_alias)
            .field("origin_aliases", &self.origin_aliases)
            .finish()
    }
}

impl LLMRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_alias: "default".to_string(),
            origin_aliases: HashMap::new(),
        }
    }

    pub fn register(&mut self, alias: impl Into<String>, provider: Arc<dyn LLMProvider>) {
        self.providers.insert(alias.into(), provider);
    }

    pub fn set_default(&mut self, alias: impl Into<String>) {
        self.default_alias = alias.into();
    }

    /// Pin an origin to a provider alias, overriding the default.
    pub fn set_origin_provider(&mut self, origin: impl Into<String>, alias: impl Into<String>) {
        self.origin_aliases.insert(origin.into(), alias.into());
    }

    pub fn get(&self, alias: &str) -> Result<Arc<dyn LLMProvider>, LLMError> {
        self.providers
            .get(alias)
            .cloned()
            .ok_or_else(|| LLMError::ProviderNotFound(alias.to_string()))
    }

    pub fn default(&self) -> Result<Arc<dyn LLMProvider>, LLMError> {
        self.get(&self.default_alias)
    }

    pub fn default_alias(&self) -> &str {
        &self.default_alias
    }

    pub fn has(&self, alias: &str) -> bool {
        self.providers.contains_key(alias)
    }

    pub fn aliases(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for LLMRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderRouter for LLMRegistry {
    async fn generate(
        &self,
        provider_id: &str,
        prompt: &str,
        contexts: &[ChatMessage],
        config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, LLMError> {
        let provider = self.get(provider_id)?;
        tracing::debug!(
            provider_id = %provider_id,
            provider = %provider.provider_name(),
            "Generating completion"
        );

        let mut messages = contexts.to_vec();
        messages.push(ChatMessage::user(prompt));

        provider.complete(&messages, config).await
    }

    async fn current_provider_id(&self, origin: &str) -> Result<Option<String>, LLMError> {
        if let Some(alias) = self.origin_aliases.get(origin) {
            return Ok(Some(alias.clone()));
        }
        if self.has(&self.default_alias) {
            return Ok(Some(self.default_alias.clone()));
        }
        Ok(None)
    }
}
