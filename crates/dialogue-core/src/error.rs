//! Error types for the dialogue crates

use thiserror::Error;

use crate::traits::llm::LLMError;

pub type Result<T> = std::result::Result<T, DialogueError>;

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Reported by a store when the write went through but the backend still
    /// complained (for example a hashing or uniqueness warning on an update path).
    #[error("Persisted with warning: {0}")]
    BenignPersist(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LLM error: {0}")]
    LLM(#[from] LLMError),
}

impl DialogueError {
    pub fn is_benign(&self) -> bool {
        matches!(self, DialogueError::BenignPersist(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_classification() {
        assert!(DialogueError::BenignPersist("unhashable type".into()).is_benign());
        assert!(!DialogueError::Storage("disk full".into()).is_benign());
    }

    #[test]
    fn test_llm_error_conversion() {
        let err: DialogueError = LLMError::Network("connection reset".into()).into();
        assert!(err.to_string().contains("connection reset"));
    }
}
