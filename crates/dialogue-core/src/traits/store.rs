//! Conversation store trait

use async_trait::async_trait;

use crate::conversation::{Conversation, NewConversation};
use crate::error::{DialogueError, Result};
use crate::message::ChatMessage;

/// Key-value conversation storage keyed by `(origin, conversation id)`.
///
/// Built-in backends: `InMemoryConversationStore`, `FileConversationStore`
/// and `SqliteConversationStore`. Implement this to plug in the host's own
/// conversation manager.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Id of the conversation the origin is currently using.
    async fn current_conversation_id(&self, origin: &str) -> Result<Option<String>>;

    /// Load a conversation. Returns `None` if it does not exist.
    async fn get_conversation(&self, origin: &str, id: &str) -> Result<Option<Conversation>>;

    /// Create a fresh conversation for the origin and make it current.
    async fn new_conversation(&self, origin: &str) -> Result<NewConversation>;

    /// Point the origin at an existing conversation.
    async fn set_current_conversation(&self, origin: &str, id: &str) -> Result<()>;

    async fn delete_conversation(&self, origin: &str, id: &str) -> Result<()>;

    /// Write a conversation record, inserting or overwriting it.
    ///
    /// Backends whose write path can raise a harmless complaint after the data
    /// is stored should report it as `DialogueError::BenignPersist`.
    async fn persist(&self, conversation: &Conversation) -> Result<()>;

    /// Whether `replace_history` is implemented as a single all-or-nothing write.
    fn supports_atomic_replace(&self) -> bool {
        false
    }

    /// Atomically replace the whole history of an existing conversation.
    async fn replace_history(
        &self,
        origin: &str,
        id: &str,
        _history: &[ChatMessage],
    ) -> Result<()> {
        Err(DialogueError::Unsupported(format!(
            "replace_history for {}/{}",
            origin, id
        )))
    }
}
