//! Conversation store backends for the infinite dialogue compaction engine

mod file;
mod in_memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use dialogue_core::{ConversationStore, DialogueError, Result};
pub use file::FileConversationStore;
pub use in_memory::{InMemoryConversationStore, StoreOp};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConversationStore;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    #[default]
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "file")]
    File { path: String },
    #[serde(rename = "sqlite")]
    Sqlite { path: String },
}

pub async fn create_store(config: &StorageConfig) -> Result<Arc<dyn ConversationStore>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryConversationStore::new())),
        StorageConfig::File { path } => Ok(Arc::new(FileConversationStore::new(path))),

        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            let store = SqliteConversationStore::new(path).await?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => Err(DialogueError::Config(
            "SQLite storage requires 'sqlite' feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_from_yaml() {
        let config: StorageConfig = serde_yaml::from_str("type: file\npath: ./data").unwrap();
        assert_eq!(
            config,
            StorageConfig::File {
                path: "./data".to_string()
            }
        );

        let config: StorageConfig = serde_yaml::from_str("type: memory").unwrap();
        assert_eq!(config, StorageConfig::Memory);
        assert_eq!(StorageConfig::default(), StorageConfig::Memory);
    }

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_store(&StorageConfig::Memory).await.unwrap();
        assert!(store.current_conversation_id("o1").await.unwrap().is_none());
        assert!(!store.supports_atomic_replace());
    }

    #[tokio::test]
    async fn test_create_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig::File {
            path: dir.path().to_string_lossy().to_string(),
        };
        let store = create_store(&config).await.unwrap();
        assert!(store.supports_atomic_replace());
    }

    #[cfg(not(feature = "sqlite"))]
    #[tokio::test]
    async fn test_sqlite_requires_feature() {
        let config = StorageConfig::Sqlite {
            path: "conversations.db".to_string(),
        };
        assert!(matches!(
            create_store(&config).await,
            Err(DialogueError::Config(_))
        ));
    }
}
