//! Persisted conversation records and history encoding

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::{ChatMessage, Role};

/// A conversation as held by a `ConversationStore`.
///
/// `history` is kept in its persisted textual form (a JSON array of
/// `{role, content}` records) so that stores never need to understand it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub origin: String,
    pub id: String,
    #[serde(default)]
    pub history: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(origin: impl Into<String>, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            origin: origin.into(),
            id: id.into(),
            history: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn messages(&self) -> Result<Vec<ChatMessage>> {
        decode_history(&self.history)
    }

    pub fn set_messages(&mut self, messages: &[ChatMessage]) -> Result<()> {
        self.history = encode_history(messages)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn push_message(&mut self, message: ChatMessage) -> Result<()> {
        let mut messages = self.messages()?;
        messages.push(message);
        self.set_messages(&messages)
    }
}

/// What a store hands back from `new_conversation`: some backends only return
/// the new identifier, others return the live record.
#[derive(Debug, Clone)]
pub enum NewConversation {
    Id(String),
    Handle(Conversation),
}

impl NewConversation {
    pub fn id(&self) -> &str {
        match self {
            NewConversation::Id(id) => id,
            NewConversation::Handle(conversation) => &conversation.id,
        }
    }
}

pub fn encode_history(messages: &[ChatMessage]) -> Result<String> {
    Ok(serde_json::to_string(messages)?)
}

/// Decodes a persisted history.
///
/// Records are read leniently: a missing or unrecognized role becomes
/// `Role::Unknown`, missing content becomes empty, and content stored as a
/// list of typed parts is flattened to its text.
pub fn decode_history(raw: &str) -> Result<Vec<ChatMessage>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_str(raw)?;
    let records = value
        .as_array()
        .ok_or_else(|| serde_json::Error::custom("history is not a JSON array"))?;

    records
        .iter()
        .map(|record| -> Result<ChatMessage> {
            let object = record
                .as_object()
                .ok_or_else(|| serde_json::Error::custom("history record is not an object"))?;
            let role = object
                .get("role")
                .and_then(Value::as_str)
                .map(Role::parse_lenient)
                .unwrap_or(Role::Unknown);
            let content = object.get("content").map(flatten_content).unwrap_or_default();
            Ok(ChatMessage::new(role, content))
        })
        .collect()
}

fn flatten_content(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_string(),
    }
}
