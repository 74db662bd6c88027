//! Replaces a conversation's persisted history with a single summary record

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dialogue_core::{ChatMessage, Conversation, ConversationStore, DialogueError, NewConversation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStage {
    Replace,
    Create,
    Fetch,
    Write,
    Persist,
}

impl fmt::Display for RotationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotationStage::Replace => "replace",
            RotationStage::Create => "create",
            RotationStage::Fetch => "fetch",
            RotationStage::Write => "write",
            RotationStage::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    /// History replaced in place by the store.
    Replaced,
    /// A new conversation holding the summary is current. `old_deleted` is
    /// false when the superseded conversation could not be removed.
    Rotated { new_id: String, old_deleted: bool },
    /// Nothing was committed; the old conversation is untouched.
    Failed { stage: RotationStage, error: String },
}

impl RotationOutcome {
    pub fn is_rotated(&self) -> bool {
        !matches!(self, RotationOutcome::Failed { .. })
    }
}

/// Content of the summary record: the marker, then the summary. A summary the
/// model already opened with the marker is kept as is.
pub fn summary_content(marker: &str, summary: &str) -> String {
    if summary.starts_with(marker) {
        summary.to_string()
    } else {
        format!("{}\n{}", marker, summary)
    }
}

pub struct RotationManager {
    store: Arc<dyn ConversationStore>,
    marker: String,
    refetch_delay: Duration,
}

impl RotationManager {
    pub fn new(store: Arc<dyn ConversationStore>, marker: impl Into<String>) -> Self {
        Self {
            store,
            marker: marker.into(),
            refetch_delay: Duration::from_millis(100),
        }
    }

    pub fn with_refetch_delay(mut self, delay: Duration) -> Self {
        self.refetch_delay = delay;
        self
    }

    /// Replace the history of `conversation_id` with one assistant record
    /// carrying the summary. Never returns an error: failures are logged and
    /// reported through the outcome.
    pub async fn rotate(&self, origin: &str, conversation_id: &str, summary: &str) -> RotationOutcome {
        let history = vec![ChatMessage::assistant(summary_content(&self.marker, summary))];

        let outcome = if self.store.supports_atomic_replace() {
            self.replace(origin, conversation_id, &history).await
        } else {
            self.recreate(origin, conversation_id, &history).await
        };

        match &outcome {
            RotationOutcome::Replaced => {
                tracing::info!(origin = %origin, id = %conversation_id, "History replaced with summary");
            }
            RotationOutcome::Rotated { new_id, old_deleted } => {
                tracing::info!(
                    origin = %origin,
                    old_id = %conversation_id,
                    new_id = %new_id,
                    old_deleted,
                    "Conversation rotated onto summary"
                );
            }
            RotationOutcome::Failed { stage, error } => {
                tracing::error!(
                    origin = %origin,
                    id = %conversation_id,
                    stage = %stage,
                    error = %error,
                    "History rotation failed, stored history left as it was"
                );
            }
        }
        outcome
    }

    async fn replace(&self, origin: &str, id: &str, history: &[ChatMessage]) -> RotationOutcome {
        match self.store.replace_history(origin, id, history).await {
            Ok(()) => RotationOutcome::Replaced,
            Err(e) => failed(RotationStage::Replace, e),
        }
    }

    /// Create the new conversation, fill and save it, and only then delete
    /// the old one.
    async fn recreate(&self, origin: &str, old_id: &str, history: &[ChatMessage]) -> RotationOutcome {
        let created = match self.store.new_conversation(origin).await {
            Ok(created) => created,
            Err(e) => return failed(RotationStage::Create, e),
        };
        let new_id = created.id().to_string();
        tracing::info!(origin = %origin, new_id = %new_id, "New conversation started");

        let mut conversation = match self.resolve(origin, created).await {
            Ok(conversation) => conversation,
            Err(e) => {
                self.roll_back(origin, old_id, &new_id).await;
                return failed(RotationStage::Fetch, e);
            }
        };

        if let Err(e) = conversation.set_messages(history) {
            self.roll_back(origin, old_id, &new_id).await;
            return failed(RotationStage::Write, e);
        }

        match self.store.persist(&conversation).await {
            Ok(()) => {}
            Err(e) if e.is_benign() => {
                tracing::warn!(
                    origin = %origin,
                    new_id = %new_id,
                    error = %e,
                    "Store complained while saving the summary, treating it as saved"
                );
            }
            Err(e) => {
                self.roll_back(origin, old_id, &new_id).await;
                return failed(RotationStage::Persist, e);
            }
        }

        let old_deleted = match self.store.delete_conversation(origin, old_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    origin = %origin,
                    old_id = %old_id,
                    error = %e,
                    "Summary saved but the old conversation could not be deleted"
                );
                false
            }
        };

        RotationOutcome::Rotated { new_id, old_deleted }
    }

    async fn resolve(&self, origin: &str, created: NewConversation) -> Result<Conversation, DialogueError> {
        match created {
            NewConversation::Handle(conversation) => Ok(conversation),
            NewConversation::Id(id) => {
                if !self.refetch_delay.is_zero() {
                    tokio::time::sleep(self.refetch_delay).await;
                }
                self.store
                    .get_conversation(origin, &id)
                    .await?
                    .ok_or_else(|| DialogueError::NotFound(format!("new conversation {}/{}", origin, id)))
            }
        }
    }

    /// Drop the half-built conversation and point the origin back at the old one.
    async fn roll_back(&self, origin: &str, old_id: &str, new_id: &str) {
        if let Err(e) = self.store.set_current_conversation(origin, old_id).await {
            tracing::error!(
                origin = %origin,
                old_id = %old_id,
                error = %e,
                "Could not restore the previous conversation as current"
            );
        }
        if let Err(e) = self.store.delete_conversation(origin, new_id).await {
            tracing::warn!(
                origin = %origin,
                new_id = %new_id,
                error = %e,
                "Could not remove the unfinished conversation"
            );
        }
    }
}

fn failed(stage: RotationStage, error: DialogueError) -> RotationOutcome {
    RotationOutcome::Failed {
        stage,
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dialogue_core::Role;
    use dialogue_storage::{InMemoryConversationStore, StoreOp};

    const MARKER: &str = "【前情提要】";

    fn history(n: usize) -> Vec<ChatMessage> {
        (0..n).map(|i| ChatMessage::user(format!("m{}", i))).collect()
    }

    fn manager(store: &InMemoryConversationStore) -> RotationManager {
        RotationManager::new(Arc::new(store.clone()), MARKER).with_refetch_delay(Duration::ZERO)
    }

    fn assert_single_summary(conversation: &Conversation, expected: &str) {
        let messages = conversation.messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert!(messages[0].content.starts_with(MARKER));
        assert_eq!(messages[0].content, expected);
    }

    #[test]
    fn test_summary_content() {
        assert_eq!(summary_content(MARKER, "text"), "【前情提要】\ntext");
        assert_eq!(
            summary_content(MARKER, "【前情提要】Alice and Bob discussed X..."),
            "【前情提要】Alice and Bob discussed X..."
        );
    }

    #[tokio::test]
    async fn test_atomic_replace_path() {
        let store = InMemoryConversationStore::new().with_atomic_replace(true);
        let id = store.seed("o1", &history(40)).unwrap();

        let outcome = manager(&store).rotate("o1", &id, "summary").await;
        assert_eq!(outcome, RotationOutcome::Replaced);
        assert_eq!(store.mutations(), vec![StoreOp::Replace]);
        assert_single_summary(&store.peek("o1", &id).unwrap(), "【前情提要】\nsummary");
    }

    #[tokio::test]
    async fn test_atomic_replace_failure_is_contained() {
        let store = InMemoryConversationStore::new().with_atomic_replace(true);
        let id = store.seed("o1", &history(40)).unwrap();
        let before = store.peek("o1", &id).unwrap();
        store.fail_on(StoreOp::Replace);

        let outcome = manager(&store).rotate("o1", &id, "summary").await;
        assert!(matches!(
            outcome,
            RotationOutcome::Failed {
                stage: RotationStage::Replace,
                ..
            }
        ));
        assert_eq!(store.peek("o1", &id).unwrap(), before);
    }

    #[tokio::test]
    async fn test_create_before_delete_with_handle() {
        let store = InMemoryConversationStore::new();
        let old = store.seed("o1", &history(40)).unwrap();

        let outcome = manager(&store)
            .rotate("o1", &old, "【前情提要】Alice and Bob discussed X...")
            .await;
        let RotationOutcome::Rotated { new_id, old_deleted } = outcome.clone() else {
            panic!("expected rotation, got {:?}", outcome);
        };
        assert!(old_deleted);
        assert_eq!(
            store.mutations(),
            vec![StoreOp::New, StoreOp::Persist, StoreOp::Delete]
        );
        assert!(store.peek("o1", &old).is_none());

        let current = store.peek_current("o1").unwrap();
        assert_eq!(current.id, new_id);
        assert_single_summary(&current, "【前情提要】Alice and Bob discussed X...");
    }

    #[tokio::test]
    async fn test_bare_id_is_refetched() {
        let store = InMemoryConversationStore::new().with_id_results(true);
        let old = store.seed("o1", &history(40)).unwrap();

        let outcome = manager(&store).rotate("o1", &old, "summary").await;
        assert!(outcome.is_rotated());

        let ops = store.operations();
        let new_at = ops.iter().position(|op| *op == StoreOp::New).unwrap();
        assert_eq!(ops[new_at + 1], StoreOp::Get);
        assert_single_summary(&store.peek_current("o1").unwrap(), "【前情提要】\nsummary");
    }

    #[tokio::test]
    async fn test_missing_new_conversation_rolls_back() {
        let store = InMemoryConversationStore::new().with_id_results(true);
        let old = store.seed("o1", &history(40)).unwrap();
        let before = store.peek("o1", &old).unwrap();
        store.hide_new_conversations(true);

        let outcome = manager(&store).rotate("o1", &old, "summary").await;
        assert!(matches!(
            outcome,
            RotationOutcome::Failed {
                stage: RotationStage::Fetch,
                ..
            }
        ));
        assert!(!store.mutations().contains(&StoreOp::Persist));
        assert_eq!(store.peek_current("o1").unwrap(), before);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_old_history() {
        let store = InMemoryConversationStore::new();
        let old = store.seed("o1", &history(40)).unwrap();
        let before = store.peek("o1", &old).unwrap();
        store.fail_on(StoreOp::Persist);

        let outcome = manager(&store).rotate("o1", &old, "summary").await;
        assert!(matches!(
            outcome,
            RotationOutcome::Failed {
                stage: RotationStage::Persist,
                ..
            }
        ));
        assert_eq!(store.peek_current("o1").unwrap(), before);
        assert_eq!(store.conversation_count("o1"), 1);
    }

    #[tokio::test]
    async fn test_create_failure_touches_nothing() {
        let store = InMemoryConversationStore::new();
        let old = store.seed("o1", &history(40)).unwrap();
        store.fail_on(StoreOp::New);

        let outcome = manager(&store).rotate("o1", &old, "summary").await;
        assert!(matches!(
            outcome,
            RotationOutcome::Failed {
                stage: RotationStage::Create,
                ..
            }
        ));
        assert_eq!(store.mutations(), vec![StoreOp::New]);
        assert_eq!(store.peek_current("o1").unwrap().messages().unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_benign_persist_error_counts_as_saved() {
        let store = InMemoryConversationStore::new();
        let old = store.seed("o1", &history(40)).unwrap();
        store.set_benign_persist(true);

        let outcome = manager(&store).rotate("o1", &old, "summary").await;
        assert!(matches!(
            outcome,
            RotationOutcome::Rotated {
                old_deleted: true,
                ..
            }
        ));
        assert!(store.peek("o1", &old).is_none());
        assert_single_summary(&store.peek_current("o1").unwrap(), "【前情提要】\nsummary");
    }

    #[tokio::test]
    async fn test_roll_back_removes_orphan_when_current_cannot_be_restored() {
        let store = InMemoryConversationStore::new();
        let old = store.seed("o1", &history(40)).unwrap();
        let before = store.peek("o1", &old).unwrap();
        store.fail_on(StoreOp::Persist);
        store.fail_on(StoreOp::SetCurrent);

        let outcome = manager(&store).rotate("o1", &old, "summary").await;
        assert!(matches!(
            outcome,
            RotationOutcome::Failed {
                stage: RotationStage::Persist,
                ..
            }
        ));
        assert_eq!(store.peek("o1", &old).unwrap(), before);
        assert_eq!(store.conversation_count("o1"), 1);
        assert!(store.peek_current("o1").is_none());
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_new_conversation_current() {
        let store = InMemoryConversationStore::new();
        let old = store.seed("o1", &history(40)).unwrap();
        store.fail_on(StoreOp::Delete);

        let outcome = manager(&store).rotate("o1", &old, "summary").await;
        assert!(matches!(
            outcome,
            RotationOutcome::Rotated {
                old_deleted: false,
                ..
            }
        ));
        assert!(store.peek("o1", &old).is_some());
        assert_single_summary(&store.peek_current("o1").unwrap(), "【前情提要】\nsummary");
    }
}
