//! Completion oracle abstraction.
//!
//! The oracle turns an ordered sequence of role/content pairs into the next
//! reply. The core never sends internal bookkeeping fields (id, timestamp)
//! across this boundary.

pub mod openai;

use async_trait::async_trait;
use pigeon_core::{Message, Transcript};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use openai::OpenAiOracle;

/// The role/content pair shape the oracle sees. Nothing else crosses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

/// Strips a transcript down to the wire shape, preserving order.
pub fn to_wire(transcript: &Transcript) -> Vec<WireMessage> {
    transcript.messages().iter().map(WireMessage::from).collect()
}

/// Errors produced by a completion oracle.
#[derive(Error, Debug)]
pub enum OracleError {
    /// The request could not be sent or timed out.
    #[error("Oracle request failed: {message}")]
    Request { message: String, retryable: bool },

    /// The service answered with a non-success status.
    #[error("Oracle returned HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retryable: bool,
        retry_after: Option<Duration>,
    },

    /// The service replied, but with no usable content.
    #[error("Oracle returned an empty reply")]
    Empty,

    /// The reply could not be decoded.
    #[error("Failed to parse oracle response: {0}")]
    Malformed(String),
}

impl OracleError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { retryable, .. } | Self::Http { retryable, .. } => *retryable,
            Self::Empty | Self::Malformed(_) => false,
        }
    }
}

/// A request/response completion service.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Requests one completion over the given ordered role/content pairs.
    ///
    /// An empty reply is an error; callers never have to distinguish "no
    /// reply" from "empty reply".
    async fn complete(&self, messages: &[WireMessage]) -> Result<String, OracleError>;
}
