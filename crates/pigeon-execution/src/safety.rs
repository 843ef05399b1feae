//! Pre-execution safety gate.
//!
//! One oracle round-trip per command. Fail-closed: any oracle failure or
//! ambiguous reply means the command does not run.

use std::sync::Arc;

use pigeon_interaction::{Oracle, WireMessage};
use tracing::warn;

/// The single canonical affirmative token. Anything else is a rejection.
pub const SAFE_TOKEN: &str = "SAFE";

const GENERIC_UNSAFE_REASON: &str = "safety check could not be completed";

/// The safe/unsafe decision for one command fragment.
///
/// Produced exactly once per command and never cached, even when identical
/// fragment text repeats within a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub reason: Option<String>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            reason: None,
        }
    }

    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            reason: Some(reason.into()),
        }
    }
}

/// Asks the oracle whether one fragment is safe to run.
#[derive(Clone)]
pub struct SafetyValidator {
    oracle: Arc<dyn Oracle>,
}

impl SafetyValidator {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Returns exactly one verdict for the fragment.
    ///
    /// The oracle sees a single-turn question: the fixed policy plus the
    /// fragment. Its reply is exact-matched (after trimming) against
    /// [`SAFE_TOKEN`]; any other non-empty reply is an unsafe verdict whose
    /// text is the reason. An oracle error or empty reply is unsafe with a
    /// generic reason — never safe.
    pub async fn check(&self, fragment: &str) -> SafetyVerdict {
        let question = vec![WireMessage {
            role: "user".to_string(),
            content: format!(
                "You are a safety gate for a mail assistant. The following is a \
                 single mail-protocol command that would run against only the \
                 mailbox session - no filesystem, no network beyond the mailbox. \
                 Reply with exactly `{SAFE_TOKEN}` if it is safe to run. \
                 Otherwise reply with a short reason why it is not.\n\n{fragment}"
            ),
        }];

        let reply = match self.oracle.complete(&question).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "safety check failed, treating command as unsafe");
                return SafetyVerdict::unsafe_because(GENERIC_UNSAFE_REASON);
            }
        };

        let trimmed = reply.trim();
        if trimmed == SAFE_TOKEN {
            SafetyVerdict::safe()
        } else if trimmed.is_empty() {
            SafetyVerdict::unsafe_because(GENERIC_UNSAFE_REASON)
        } else {
            SafetyVerdict::unsafe_because(trimmed)
        }
    }
}
