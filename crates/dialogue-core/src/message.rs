//! Conversation message types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Unknown => "unknown",
        }
    }

    /// Parses a role name, mapping anything unrecognized to `Unknown`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::Unknown,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            timestamp: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Transcript line used when building prompts: `"<role>: <content>\n"`.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}\n", self.role, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_deserializes() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role": "tool", "content": "42"}"#).unwrap();
        assert_eq!(msg.role, Role::Unknown);
        assert_eq!(msg.content, "42");
    }

    #[test]
    fn test_wire_format_is_role_and_content() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_transcript_line() {
        assert_eq!(ChatMessage::user("hello").transcript_line(), "user: hello\n");
        assert_eq!(
            ChatMessage::new(Role::Unknown, "x").transcript_line(),
            "unknown: x\n"
        );
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(Role::parse_lenient("Assistant"), Role::Assistant);
        assert_eq!(Role::parse_lenient("function"), Role::Unknown);
    }
}
