use dialogue_core::{InboundEvent, MessageSegment};

use crate::rotation::summary_content;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Summary prepended to the leading text segment.
    Prepended,
    /// No leading text segment; a new one was inserted at the front.
    Inserted,
    /// The leading text segment already carried the marker.
    AlreadyPresent,
}

/// Put the summary in front of the message currently being handled so this
/// turn sees it even when the stored history could not be rotated.
pub fn inject(event: &mut InboundEvent, marker: &str, summary: &str) -> InjectOutcome {
    let prefix = format!("{}\n", summary_content(marker, summary));

    let outcome = match event.message.first_mut() {
        Some(MessageSegment::Text { text }) => {
            if text.contains(marker) {
                InjectOutcome::AlreadyPresent
            } else {
                text.insert_str(0, &prefix);
                InjectOutcome::Prepended
            }
        }
        _ => {
            event.message.insert(0, MessageSegment::text(prefix));
            InjectOutcome::Inserted
        }
    };

    event.refresh_message_str();
    outcome
}
