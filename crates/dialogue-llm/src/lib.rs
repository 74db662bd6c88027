//! LLM providers and the provider-id registry used by the compaction engine

pub mod mock;
pub mod providers;
pub mod registry;

pub use dialogue_core::{
    ChatMessage, FinishReason, LLMConfig, LLMError, LLMProvider, LLMResponse, ProviderRouter,
    Role, TokenUsage,
};
pub use mock::{MockCall, MockLLMProvider, MockOutcome};
pub use providers::{BackendKind, ChatBackend, ProviderSettings};
pub use registry::LLMRegistry;
