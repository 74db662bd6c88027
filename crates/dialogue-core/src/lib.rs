//! Core types and traits for the infinite dialogue compaction engine

pub mod conversation;
pub mod error;
pub mod event;
pub mod message;
pub mod traits;
pub mod types;

pub use conversation::{Conversation, NewConversation, decode_history, encode_history};
pub use error::{DialogueError, Result};
pub use event::{InboundEvent, MessageSegment};
pub use message::{ChatMessage, Role};
pub use traits::llm::{LLMError, LLMProvider, ProviderRouter};
pub use traits::notify::Notifier;
pub use traits::store::ConversationStore;
pub use types::{FinishReason, LLMConfig, LLMResponse, TokenUsage};
