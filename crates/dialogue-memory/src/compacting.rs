//! Compaction engine: threshold check, summary, rotation and live injection

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use dialogue_core::{
    Conversation, ConversationStore, InboundEvent, MessageSegment, Notifier, ProviderRouter,
    Result,
};

use crate::config::CompactionConfig;
use crate::inject::{InjectOutcome, inject};
use crate::locks::OriginLocks;
use crate::monitor::{ThresholdDecision, ThresholdMonitor, load_history};
use crate::rotation::{RotationManager, RotationOutcome};
use crate::summarizer::SummaryOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The store could not resolve the current conversation.
    LookupFailed,
    /// The origin has no current conversation.
    NoConversation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompactionStatus {
    NotAllowed,
    Skipped(SkipReason),
    BelowThreshold { len: usize, max: usize },
    SummaryFailed { attempts: u32 },
    Compacted(CompactionResult),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompactionResult {
    pub rotated: bool,
    pub injected: bool,
    pub rotation: RotationOutcome,
    pub injection: InjectOutcome,
    pub summary: String,
    pub provider_id: Option<String>,
    pub messages_compacted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub origin: String,
    pub conversation_id: String,
    pub messages_compacted: usize,
    pub summary_length: usize,
    pub provider_id: Option<String>,
    pub attempts: u32,
    pub rotated: bool,
    pub injected: bool,
}

pub struct CompactionEngine {
    config: CompactionConfig,
    store: Arc<dyn ConversationStore>,
    router: Arc<dyn ProviderRouter>,
    notifier: Arc<dyn Notifier>,
    monitor: ThresholdMonitor,
    orchestrator: SummaryOrchestrator,
    rotation: RotationManager,
    locks: OriginLocks,
    compaction_history: RwLock<VecDeque<CompactionRecord>>,
}

impl CompactionEngine {
    pub fn new(
        config: CompactionConfig,
        store: Arc<dyn ConversationStore>,
        router: Arc<dyn ProviderRouter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let monitor = ThresholdMonitor::new(config.max_conversation_length);
        let orchestrator = SummaryOrchestrator::new(router.clone(), &config);
        let rotation = RotationManager::new(store.clone(), config.marker.clone())
            .with_refetch_delay(config.refetch_delay());

        Self {
            config,
            store,
            router,
            notifier,
            monitor,
            orchestrator,
            rotation,
            locks: OriginLocks::new(),
            compaction_history: RwLock::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Most recent compactions, oldest first, capped at `max_history`.
    pub fn compaction_history(&self) -> Vec<CompactionRecord> {
        self.compaction_history.read().iter().cloned().collect()
    }

    /// Run the engine for one inbound event.
    ///
    /// The origin stays locked from the length check until the summary has
    /// been injected, so at most one compaction per origin is in flight.
    pub async fn handle_event(&self, event: &mut InboundEvent) -> CompactionStatus {
        if !self.config.is_allowed(event.allow_list_id()) {
            tracing::debug!(origin = %event.origin, "Origin not in whitelist, skipping");
            return CompactionStatus::NotAllowed;
        }

        let origin = event.origin.clone();
        let guard = self.locks.acquire(&origin).await;
        let status = self.compact_locked(&origin, event).await;
        self.locks.release(&origin, guard).await;
        status
    }

    async fn compact_locked(&self, origin: &str, event: &mut InboundEvent) -> CompactionStatus {
        let conversation = match self.current_conversation(origin).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => {
                tracing::debug!(origin = %origin, "No current conversation");
                return CompactionStatus::Skipped(SkipReason::NoConversation);
            }
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Failed to load conversation");
                return CompactionStatus::Skipped(SkipReason::LookupFailed);
            }
        };

        let history = load_history(&conversation);
        let (len, max) = match self.monitor.check(history.len()) {
            ThresholdDecision::Keep { len, max } => {
                return CompactionStatus::BelowThreshold { len, max };
            }
            ThresholdDecision::Compact { len, max } => (len, max),
        };
        tracing::info!(
            origin = %origin,
            "Conversation length {} reached threshold {}, summarizing",
            len,
            max
        );

        let default_provider_id = self.default_provider_id(origin).await;
        let outcome = self
            .orchestrator
            .summarize(&history, default_provider_id.as_deref())
            .await;

        let summary = match outcome.text {
            Some(text) if outcome.success => text,
            _ => {
                self.notify_failure(origin).await;
                return CompactionStatus::SummaryFailed {
                    attempts: outcome.attempts,
                };
            }
        };

        let rotation = self.rotation.rotate(origin, &conversation.id, &summary).await;
        let injection = inject(event, &self.config.marker, &summary);
        tracing::info!(origin = %origin, ?injection, "Summary injected into the current message");

        let result = CompactionResult {
            rotated: rotation.is_rotated(),
            injected: injection != InjectOutcome::AlreadyPresent,
            rotation,
            injection,
            summary,
            provider_id: outcome.provider_id,
            messages_compacted: len,
        };
        self.record_compaction(origin, &conversation.id, &result, outcome.attempts);

        CompactionStatus::Compacted(result)
    }

    async fn current_conversation(&self, origin: &str) -> Result<Option<Conversation>> {
        match self.store.current_conversation_id(origin).await? {
            Some(id) => self.store.get_conversation(origin, &id).await,
            None => Ok(None),
        }
    }

    async fn default_provider_id(&self, origin: &str) -> Option<String> {
        match self.router.current_provider_id(origin).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Failed to resolve current provider id");
                None
            }
        }
    }

    async fn notify_failure(&self, origin: &str) {
        let chain = vec![MessageSegment::text(self.config.failure_notice.clone())];
        if let Err(e) = self.notifier.send(origin, chain).await {
            tracing::error!(origin = %origin, error = %e, "Failed to send failure notice");
        }
    }

    fn record_compaction(
        &self,
        origin: &str,
        conversation_id: &str,
        result: &CompactionResult,
        attempts: u32,
    ) {
        let record = CompactionRecord {
            timestamp: chrono::Utc::now(),
            origin: origin.to_string(),
            conversation_id: conversation_id.to_string(),
            messages_compacted: result.messages_compacted,
            summary_length: result.summary.chars().count(),
            provider_id: result.provider_id.clone(),
            attempts,
            rotated: result.rotated,
            injected: result.injected,
        };
        let mut history = self.compaction_history.write();
        history.push_back(record);
        while history.len() > self.config.max_history {
            history.pop_front();
        }
    }
}
