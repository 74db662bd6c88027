//! Conversation compaction engine: threshold monitor, summary orchestration,
//! history rotation and live-message injection

mod compacting;
mod config;
mod inject;
mod locks;
mod monitor;
mod rotation;
mod summarizer;

pub use compacting::{
    CompactionEngine, CompactionRecord, CompactionResult, CompactionStatus, SkipReason,
};
pub use config::{
    BackoffConfig, BackoffType, CompactionConfig, DEFAULT_FAILURE_NOTICE, DEFAULT_MARKER,
    DEFAULT_PROMPT_TEMPLATE,
};
pub use inject::{InjectOutcome, inject};
pub use locks::OriginLocks;
pub use monitor::{ThresholdDecision, ThresholdMonitor, load_history};
pub use rotation::{RotationManager, RotationOutcome, RotationStage, summary_content};
pub use summarizer::{SummaryOrchestrator, SummaryOutcome, provider_candidates};
