pub mod backend;

pub use backend::{BackendKind, ChatBackend, ProviderSettings};
