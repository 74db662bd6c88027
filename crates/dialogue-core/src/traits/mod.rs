//! Collaborator traits consumed by the compaction engine

pub mod llm;
pub mod notify;
pub mod store;

pub use llm::{LLMError, LLMProvider, ProviderRouter};
pub use notify::Notifier;
pub use store::ConversationStore;
