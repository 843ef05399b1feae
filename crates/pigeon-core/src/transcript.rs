//! The append-only conversation transcript.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageRole};

/// An ordered, append-only sequence of conversation messages.
///
/// Within a turn messages are only ever appended; the single deletion path is
/// a process restart loading a persisted snapshot. Ordering is insertion
/// order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a transcript from an ordered message sequence.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Appends a new message, assigning its id and timestamp, and returns a
    /// reference to the stored message.
    pub fn append(&mut self, role: MessageRole, content: impl Into<String>) -> &Message {
        self.messages.push(Message::new(role, content));
        // Safe to unwrap because we just pushed an element
        self.messages.last().unwrap()
    }

    /// Returns the messages in insertion order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the transcript.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the transcript holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
