use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use dialogue_llm::{LLMProvider, LLMRegistry, ProviderSettings};
use dialogue_memory::CompactionConfig;
use dialogue_storage::StorageConfig;

const APP_DIR: &str = "infinite-dialogue";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(flatten)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,

    #[serde(default)]
    pub default_provider: Option<String>,

    /// Origins pinned to a specific provider alias.
    #[serde(default)]
    pub origin_providers: HashMap<String, String>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path().context("No config directory available")?,
        };

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Self::from_yaml_str("{}");
        }

        let yaml = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.compaction.validate()?;

        if let Some(alias) = &config.default_provider {
            if !config.providers.contains_key(alias) {
                bail!("default_provider '{}' is not defined under providers", alias);
            }
        }
        Ok(config)
    }

    /// Configured storage, or JSON files under the user data directory.
    pub fn storage(&self) -> Result<StorageConfig> {
        if let Some(storage) = &self.storage {
            return Ok(storage.clone());
        }
        let dir = dirs::data_dir()
            .context("No data directory available, set `storage` explicitly")?
            .join(APP_DIR)
            .join("conversations");
        Ok(StorageConfig::File {
            path: dir.to_string_lossy().to_string(),
        })
    }

    pub fn build_registry(&self) -> Result<LLMRegistry> {
        let mut registry = LLMRegistry::new();

        for (alias, settings) in &self.providers {
            let provider = settings
                .build()
                .with_context(|| format!("Failed to build provider '{}'", alias))?;
            tracing::debug!(alias = %alias, backend = %provider.provider_name(), "Provider registered");
            registry.register(alias.clone(), Arc::new(provider));
        }

        if let Some(alias) = &self.default_provider {
            registry.set_default(alias.clone());
        }
        for (origin, alias) in &self.origin_providers {
            registry.set_origin_provider(origin.clone(), alias.clone());
        }

        Ok(registry)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.yaml"))
}
