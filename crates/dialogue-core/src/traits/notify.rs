//! Outbound notification channel

use async_trait::async_trait;

use crate::error::Result;
use crate::event::MessageSegment;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a message chain to the given origin.
    async fn send(&self, origin: &str, chain: Vec<MessageSegment>) -> Result<()>;
}
