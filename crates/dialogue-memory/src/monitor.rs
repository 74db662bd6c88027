use dialogue_core::{ChatMessage, Conversation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdDecision {
    Compact { len: usize, max: usize },
    Keep { len: usize, max: usize },
}

impl ThresholdDecision {
    pub fn should_compact(&self) -> bool {
        matches!(self, ThresholdDecision::Compact { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdMonitor {
    max_len: usize,
}

impl ThresholdMonitor {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn check(&self, len: usize) -> ThresholdDecision {
        if len >= self.max_len {
            ThresholdDecision::Compact {
                len,
                max: self.max_len,
            }
        } else {
            ThresholdDecision::Keep {
                len,
                max: self.max_len,
            }
        }
    }
}

/// Decode a conversation's stored history. Unreadable history counts as empty.
pub fn load_history(conversation: &Conversation) -> Vec<ChatMessage> {
    match conversation.messages() {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(
                origin = %conversation.origin,
                id = %conversation.id,
                error = %e,
                "Stored history is unreadable, treating it as empty"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        let monitor = ThresholdMonitor::new(40);
        assert!(!monitor.check(0).should_compact());
        assert!(!monitor.check(39).should_compact());
        assert!(monitor.check(40).should_compact());
        assert!(monitor.check(41).should_compact());
        assert_eq!(monitor.check(39), ThresholdDecision::Keep { len: 39, max: 40 });
    }

    #[test]
    fn test_load_history_fail_open() {
        let mut conversation = Conversation::new("o1", "c1");
        conversation.history = "{not json".to_string();
        assert!(load_history(&conversation).is_empty());

        conversation.history = r#"{"role":"user"}"#.to_string();
        assert!(load_history(&conversation).is_empty());
    }

    #[test]
    fn test_load_history_lenient_records() {
        let mut conversation = Conversation::new("o1", "c1");
        conversation.history = r#"[
            {"role": "user", "content": "hi"},
            {"content": "no role"},
            {"role": "tool", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}
        ]"#
        .to_string();

        let messages = load_history(&conversation);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role.as_str(), "unknown");
        assert_eq!(messages[2].content, "ab");
    }
}
