//! Error types for the Pigeon application.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the entire Pigeon application.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum PigeonError {
    /// The completion oracle failed or returned nothing usable.
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Command execution error
    #[error("Execution error: {0}")]
    Execution(String),

    /// A turn is already in flight for this transcript.
    #[error("A turn is already running; new input is rejected until it completes")]
    TurnBusy,

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PigeonError {
    /// Creates an Oracle error.
    pub fn oracle(message: impl Into<String>) -> Self {
        Self::Oracle(message.into())
    }

    /// Creates an IO error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Creates an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a TurnBusy error.
    pub fn is_turn_busy(&self) -> bool {
        matches!(self, Self::TurnBusy)
    }

    /// Check if this is an Oracle error.
    pub fn is_oracle(&self) -> bool {
        matches!(self, Self::Oracle(_))
    }
}

impl From<std::io::Error> for PigeonError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for PigeonError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for PigeonError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, PigeonError>`.
pub type Result<T> = std::result::Result<T, PigeonError>;
