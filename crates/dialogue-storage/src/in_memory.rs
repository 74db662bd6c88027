use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use dialogue_core::{
    ChatMessage, Conversation, ConversationStore, DialogueError, NewConversation, Result,
};

/// Store operations, used for failure injection and the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CurrentId,
    Get,
    New,
    SetCurrent,
    Delete,
    Persist,
    Replace,
}

/// Process-local conversation store.
///
/// Clones share the same state. Besides serving as a real backend for
/// embedding, it can be told to fail individual operations, to hand back
/// bare ids instead of handles from `new_conversation`, or to hide freshly
/// created conversations from lookups.
#[derive(Clone, Default)]
pub struct InMemoryConversationStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    conversations: HashMap<(String, String), Conversation>,
    current: HashMap<String, String>,
    failing: HashSet<StoreOp>,
    benign_persist: bool,
    return_ids: bool,
    atomic_replace: bool,
    hide_new: bool,
    log: Vec<StoreOp>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `NewConversation::Id` instead of a handle from `new_conversation`.
    pub fn with_id_results(self, enabled: bool) -> Self {
        self.inner.write().return_ids = enabled;
        self
    }

    pub fn with_atomic_replace(self, enabled: bool) -> Self {
        self.inner.write().atomic_replace = enabled;
        self
    }

    pub fn fail_on(&self, op: StoreOp) {
        self.inner.write().failing.insert(op);
    }

    pub fn clear_failures(&self) {
        self.inner.write().failing.clear();
    }

    /// Make `persist` store the record and then report a benign error.
    pub fn set_benign_persist(&self, enabled: bool) {
        self.inner.write().benign_persist = enabled;
    }

    /// Keep conversations created from now on invisible to `get_conversation`.
    pub fn hide_new_conversations(&self, enabled: bool) {
        self.inner.write().hide_new = enabled;
    }

    /// Create a conversation holding `messages` and make it current.
    pub fn seed(&self, origin: &str, messages: &[ChatMessage]) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut conversation = Conversation::new(origin, &id);
        conversation.set_messages(messages)?;

        let mut inner = self.inner.write();
        inner
            .conversations
            .insert((origin.to_string(), id.clone()), conversation);
        inner.current.insert(origin.to_string(), id.clone());
        Ok(id)
    }

    /// Insert a raw record without touching the current pointer.
    pub fn insert(&self, conversation: Conversation) {
        self.inner.write().conversations.insert(
            (conversation.origin.clone(), conversation.id.clone()),
            conversation,
        );
    }

    pub fn set_current(&self, origin: &str, id: &str) {
        self.inner
            .write()
            .current
            .insert(origin.to_string(), id.to_string());
    }

    /// Snapshot of a stored record, bypassing logging and failure injection.
    pub fn peek(&self, origin: &str, id: &str) -> Option<Conversation> {
        self.inner
            .read()
            .conversations
            .get(&(origin.to_string(), id.to_string()))
            .cloned()
    }

    pub fn peek_current(&self, origin: &str) -> Option<Conversation> {
        let inner = self.inner.read();
        let id = inner.current.get(origin)?;
        inner
            .conversations
            .get(&(origin.to_string(), id.clone()))
            .cloned()
    }

    pub fn conversation_count(&self, origin: &str) -> usize {
        self.inner
            .read()
            .conversations
            .keys()
            .filter(|(o, _)| o == origin)
            .count()
    }

    pub fn operations(&self) -> Vec<StoreOp> {
        self.inner.read().log.clone()
    }

    /// Operations that change stored state.
    pub fn mutations(&self) -> Vec<StoreOp> {
        self.operations()
            .into_iter()
            .filter(|op| {
                matches!(
                    op,
                    StoreOp::New
                        | StoreOp::SetCurrent
                        | StoreOp::Delete
                        | StoreOp::Persist
                        | StoreOp::Replace
                )
            })
            .collect()
    }

    fn begin(&self, op: StoreOp) -> Result<()> {
        let mut inner = self.inner.write();
        inner.log.push(op);
        if inner.failing.contains(&op) {
            return Err(DialogueError::Storage(format!(
                "injected failure on {:?}",
                op
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn current_conversation_id(&self, origin: &str) -> Result<Option<String>> {
        self.begin(StoreOp::CurrentId)?;
        Ok(self.inner.read().current.get(origin).cloned())
    }

    async fn get_conversation(&self, origin: &str, id: &str) -> Result<Option<Conversation>> {
        self.begin(StoreOp::Get)?;
        Ok(self.peek(origin, id))
    }

    async fn new_conversation(&self, origin: &str) -> Result<NewConversation> {
        self.begin(StoreOp::New)?;

        let id = uuid::Uuid::new_v4().to_string();
        let conversation = Conversation::new(origin, &id);

        let mut inner = self.inner.write();
        if !inner.hide_new {
            inner
                .conversations
                .insert((origin.to_string(), id.clone()), conversation.clone());
        }
        inner.current.insert(origin.to_string(), id.clone());

        if inner.return_ids {
            Ok(NewConversation::Id(id))
        } else {
            Ok(NewConversation::Handle(conversation))
        }
    }

    async fn set_current_conversation(&self, origin: &str, id: &str) -> Result<()> {
        self.begin(StoreOp::SetCurrent)?;

        let mut inner = self.inner.write();
        if !inner
            .conversations
            .contains_key(&(origin.to_string(), id.to_string()))
        {
            return Err(DialogueError::NotFound(format!("{}/{}", origin, id)));
        }
        inner.current.insert(origin.to_string(), id.to_string());
        Ok(())
    }

    async fn delete_conversation(&self, origin: &str, id: &str) -> Result<()> {
        self.begin(StoreOp::Delete)?;

        let mut inner = self.inner.write();
        inner
            .conversations
            .remove(&(origin.to_string(), id.to_string()));
        if inner.current.get(origin).map(String::as_str) == Some(id) {
            inner.current.remove(origin);
        }
        Ok(())
    }

    async fn persist(&self, conversation: &Conversation) -> Result<()> {
        self.begin(StoreOp::Persist)?;

        let mut inner = self.inner.write();
        inner.conversations.insert(
            (conversation.origin.clone(), conversation.id.clone()),
            conversation.clone(),
        );
        if inner.benign_persist {
            return Err(DialogueError::BenignPersist(
                "unhashable type: 'list'".to_string(),
            ));
        }
        Ok(())
    }

    fn supports_atomic_replace(&self) -> bool {
        self.inner.read().atomic_replace
    }

    async fn replace_history(&self, origin: &str, id: &str, history: &[ChatMessage]) -> Result<()> {
        self.begin(StoreOp::Replace)?;

        let mut inner = self.inner.write();
        if !inner.atomic_replace {
            return Err(DialogueError::Unsupported(
                "atomic replace is disabled".to_string(),
            ));
        }
        let conversation = inner
            .conversations
            .get_mut(&(origin.to_string(), id.to_string()))
            .ok_or_else(|| DialogueError::NotFound(format!("{}/{}", origin, id)))?;
        conversation.set_messages(history)
    }
}
