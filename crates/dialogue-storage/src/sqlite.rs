//! SQLite conversation store

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dialogue_core::{
    ChatMessage, Conversation, ConversationStore, DialogueError, NewConversation, Result,
};

type ConversationRow = (String, String, String, String, String);

pub struct SqliteConversationStore {
    pool: sqlx::SqlitePool,
}

fn storage_err(e: impl std::fmt::Display) -> DialogueError {
    DialogueError::Storage(e.to_string())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(storage_err)
}

impl SqliteConversationStore {
    pub async fn new(path: &str) -> Result<Self> {
        let pool = Self::connect(path).await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn connect(path: &str) -> Result<sqlx::SqlitePool> {
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(path)
            .map_err(storage_err)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // A single connection keeps `:memory:` databases shared across calls.
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(storage_err)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                origin TEXT NOT NULL,
                cid TEXT NOT NULL,
                history TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (origin, cid)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS current_conversations (
                origin TEXT PRIMARY KEY,
                cid TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn upsert(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (origin, cid, history, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(origin, cid) DO UPDATE SET
                history = excluded.history,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&conversation.origin)
        .bind(&conversation.id)
        .bind(&conversation.history)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn current_conversation_id(&self, origin: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT cid FROM current_conversations WHERE origin = ?")
                .bind(origin)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;
        Ok(row.map(|(cid,)| cid))
    }

    async fn get_conversation(&self, origin: &str, id: &str) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT origin, cid, history, created_at, updated_at
            FROM conversations WHERE origin = ? AND cid = ?
            "#,
        )
        .bind(origin)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some((origin, id, history, created_at, updated_at)) => {
                Ok(Some(Conversation {
                    origin,
                    id,
                    history,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn new_conversation(&self, origin: &str) -> Result<NewConversation> {
        let id = uuid::Uuid::new_v4().to_string();
        let conversation = Conversation::new(origin, &id);

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query(
            r#"
            INSERT INTO conversations (origin, cid, history, created_at, updated_at)
            VALUES (?, ?, '', ?, ?)
            "#,
        )
        .bind(origin)
        .bind(&id)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            INSERT INTO current_conversations (origin, cid) VALUES (?, ?)
            ON CONFLICT(origin) DO UPDATE SET cid = excluded.cid
            "#,
        )
        .bind(origin)
        .bind(&id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;

        Ok(NewConversation::Id(id))
    }

    async fn set_current_conversation(&self, origin: &str, id: &str) -> Result<()> {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT cid FROM conversations WHERE origin = ? AND cid = ?")
                .bind(origin)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;
        if exists.is_none() {
            return Err(DialogueError::NotFound(format!("{}/{}", origin, id)));
        }

        sqlx::query(
            r#"
            INSERT INTO current_conversations (origin, cid) VALUES (?, ?)
            ON CONFLICT(origin) DO UPDATE SET cid = excluded.cid
            "#,
        )
        .bind(origin)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_conversation(&self, origin: &str, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query("DELETE FROM conversations WHERE origin = ? AND cid = ?")
            .bind(origin)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        sqlx::query("DELETE FROM current_conversations WHERE origin = ? AND cid = ?")
            .bind(origin)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn persist(&self, conversation: &Conversation) -> Result<()> {
        let mut conversation = conversation.clone();
        conversation.updated_at = Utc::now();
        self.upsert(&conversation).await
    }

    fn supports_atomic_replace(&self) -> bool {
        true
    }

    async fn replace_history(&self, origin: &str, id: &str, history: &[ChatMessage]) -> Result<()> {
        let encoded = dialogue_core::encode_history(history)?;

        let result = sqlx::query(
            "UPDATE conversations SET history = ?, updated_at = ? WHERE origin = ? AND cid = ?",
        )
        .bind(&encoded)
        .bind(Utc::now().to_rfc3339())
        .bind(origin)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(DialogueError::NotFound(format!("{}/{}", origin, id)));
        }
        Ok(())
    }
}
