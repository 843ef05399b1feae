//! Conversation message types.
//!
//! A transcript is an append-only sequence of [`Message`]s. Ids and
//! timestamps are assigned exactly once, at append time, by the transcript —
//! never by the oracle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Represents the role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from the user.
    User,
    /// Message from the AI assistant.
    Assistant,
    /// Internal bookkeeping message (command echoes, outcomes, prompts).
    /// Accepts the legacy `system` spelling on load.
    #[serde(alias = "system")]
    Developer,
}

impl MessageRole {
    /// The wire-level role string sent to the completion oracle.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Developer => "developer",
        }
    }
}

/// A single message in a conversation transcript.
///
/// Immutable once created. The `id` and `timestamp` fields are internal
/// bookkeeping and are stripped before anything is sent to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, assigned at append time.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// The role of the message sender.
    pub role: MessageRole,
    /// The content of the message.
    pub content: String,
    /// Creation instant. Lenient on load: a missing or malformed value
    /// default-constructs to the Unix epoch instead of failing the record.
    #[serde(default = "epoch", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a new message with a fresh id and the current instant.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let parsed = raw.and_then(|value| match value {
        serde_json::Value::String(s) => s.parse::<DateTime<Utc>>().ok(),
        _ => None,
    });
    Ok(parsed.unwrap_or_else(epoch))
}
