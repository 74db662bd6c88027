//! Inbound message events delivered by the host

use serde::{Deserialize, Serialize};

/// One segment of an inbound message chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageSegment {
    Text { text: String },
    Image { url: String },
    At { target: String },
    Reply { message_id: String },
    Other {
        kind: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl MessageSegment {
    pub fn text(text: impl Into<String>) -> Self {
        MessageSegment::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageSegment::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A message being processed by the host, handed to the engine by mutable
/// reference so the current turn can be patched in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Stable identifier of the chat/channel/user the conversation belongs to.
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub message: Vec<MessageSegment>,
    /// Cached flattened text of `message`.
    #[serde(default)]
    pub message_str: String,
}

impl InboundEvent {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Default::default()
        }
    }

    pub fn with_text(origin: impl Into<String>, text: impl Into<String>) -> Self {
        let mut event = Self::new(origin);
        event.message.push(MessageSegment::text(text));
        event.refresh_message_str();
        event
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Identifier used for allow-list checks: the group id when the message
    /// came from a group, otherwise the sender id.
    pub fn allow_list_id(&self) -> Option<&str> {
        self.group_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or(self.sender_id.as_deref())
    }

    pub fn refresh_message_str(&mut self) {
        self.message_str = self
            .message
            .iter()
            .filter_map(MessageSegment::as_text)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_id_prefers_group() {
        let event = InboundEvent::new("o").with_group("g1").with_sender("u1");
        assert_eq!(event.allow_list_id(), Some("g1"));

        let event = InboundEvent::new("o").with_sender("u1");
        assert_eq!(event.allow_list_id(), Some("u1"));

        let event = InboundEvent::new("o").with_group("").with_sender("u2");
        assert_eq!(event.allow_list_id(), Some("u2"));

        assert_eq!(InboundEvent::new("o").allow_list_id(), None);
    }

    #[test]
    fn test_refresh_message_str_joins_text_segments() {
        let mut event = InboundEvent::new("o");
        event.message = vec![
            MessageSegment::text("hello "),
            MessageSegment::At {
                target: "bot".into(),
            },
            MessageSegment::text("world"),
        ];
        event.refresh_message_str();
        assert_eq!(event.message_str, "hello world");
    }

    #[test]
    fn test_segment_serde_tagging() {
        let json = serde_json::to_string(&MessageSegment::text("x")).unwrap();
        assert_eq!(json, r#"{"type":"text","text":"x"}"#);
    }
}
