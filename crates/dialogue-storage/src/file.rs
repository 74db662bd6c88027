use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use dialogue_core::{
    ChatMessage, Conversation, ConversationStore, DialogueError, NewConversation, Result,
};

const CURRENT_FILE: &str = "current";

/// Conversation store on the local filesystem.
///
/// Layout: `<base>/<encoded origin>/<id>.json` per conversation plus a
/// `current` file holding the active id. Every write goes through a temp
/// file and a rename, so history replacement is atomic.
pub struct FileConversationStore {
    base_path: PathBuf,
}

impl FileConversationStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn origin_dir(&self, origin: &str) -> PathBuf {
        self.base_path.join(encode_origin(origin))
    }

    fn conversation_path(&self, origin: &str, id: &str) -> PathBuf {
        self.origin_dir(origin).join(format!("{}.json", id))
    }

    fn current_path(&self, origin: &str) -> PathBuf {
        self.origin_dir(origin).join(CURRENT_FILE)
    }

    async fn load(&self, origin: &str, id: &str) -> Result<Option<Conversation>> {
        let path = self.conversation_path(origin, id);
        if !path.exists() {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    async fn write(&self, conversation: &Conversation) -> Result<()> {
        let json = serde_json::to_vec_pretty(conversation)?;
        let path = self.conversation_path(&conversation.origin, &conversation.id);
        write_atomic(path, json).await
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn current_conversation_id(&self, origin: &str) -> Result<Option<String>> {
        let path = self.current_path(origin);
        if !path.exists() {
            return Ok(None);
        }
        let id = tokio::fs::read_to_string(path).await?;
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(id.to_string()))
    }

    async fn get_conversation(&self, origin: &str, id: &str) -> Result<Option<Conversation>> {
        self.load(origin, id).await
    }

    async fn new_conversation(&self, origin: &str) -> Result<NewConversation> {
        let id = uuid::Uuid::new_v4().to_string();
        let conversation = Conversation::new(origin, &id);

        self.write(&conversation).await?;
        write_atomic(self.current_path(origin), id.clone().into_bytes()).await?;

        tracing::debug!(origin = %origin, id = %id, "Created conversation file");
        Ok(NewConversation::Handle(conversation))
    }

    async fn set_current_conversation(&self, origin: &str, id: &str) -> Result<()> {
        if !self.conversation_path(origin, id).exists() {
            return Err(DialogueError::NotFound(format!("{}/{}", origin, id)));
        }
        write_atomic(self.current_path(origin), id.as_bytes().to_vec()).await
    }

    async fn delete_conversation(&self, origin: &str, id: &str) -> Result<()> {
        let path = self.conversation_path(origin, id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        if self.current_conversation_id(origin).await?.as_deref() == Some(id) {
            tokio::fs::remove_file(self.current_path(origin)).await?;
        }
        Ok(())
    }

    async fn persist(&self, conversation: &Conversation) -> Result<()> {
        let mut conversation = conversation.clone();
        conversation.updated_at = chrono::Utc::now();
        self.write(&conversation).await
    }

    fn supports_atomic_replace(&self) -> bool {
        true
    }

    async fn replace_history(&self, origin: &str, id: &str, history: &[ChatMessage]) -> Result<()> {
        let mut conversation = self
            .load(origin, id)
            .await?
            .ok_or_else(|| DialogueError::NotFound(format!("{}/{}", origin, id)))?;
        conversation.set_messages(history)?;
        self.write(&conversation).await
    }
}

/// Percent-encode everything outside `[A-Za-z0-9._-]` so origins such as
/// `qq:GroupMessage:123` map to a single path component.
fn encode_origin(origin: &str) -> String {
    let mut encoded = String::with_capacity(origin.len());
    for byte in origin.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => encoded.push(byte as char),
            b'.' if !encoded.is_empty() => encoded.push('.'),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    if encoded.is_empty() {
        encoded.push_str("%00");
    }
    encoded
}

async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| DialogueError::Storage(format!("write task failed: {}", e)))?
    .map_err(DialogueError::from)
}
