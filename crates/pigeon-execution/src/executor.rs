//! Executes one vetted command against a fresh mailbox session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::mailbox::Mailbox;

/// The result of running one command fragment.
///
/// Always recorded in the transcript, never silently dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The fragment's produced value, verbatim.
    Success(Value),
    /// A structured failure description. Never propagates as an error: the
    /// orchestrator must not crash because a fragment misbehaved.
    Failure {
        message: String,
        trace: Option<String>,
    },
}

impl ExecutionOutcome {
    fn failure(err: &anyhow::Error) -> Self {
        Self::Failure {
            message: format!("Error: {err}"),
            trace: Some(format!("{err:?}")),
        }
    }
}

/// Runs one already-vetted fragment against a freshly-acquired session.
///
/// The session is exclusively owned by the invocation and released on every
/// exit path - success, failure, or timeout - before this returns. This is
/// the only place real mailbox mutation happens; it must never be handed a
/// fragment that failed the safety gate.
#[derive(Clone)]
pub struct CommandExecutor {
    mailbox: Arc<dyn Mailbox>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(mailbox: Arc<dyn Mailbox>, timeout: Duration) -> Self {
        Self { mailbox, timeout }
    }

    /// Executes `fragment` and returns its outcome.
    ///
    /// The session timeout bounds every session call - connect, the command
    /// itself, and disconnect - so a silent server can never hang the turn.
    pub async fn execute(&self, fragment: &str) -> ExecutionOutcome {
        let mut session = match tokio::time::timeout(self.timeout, self.mailbox.connect()).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                warn!(error = %err, "failed to open mailbox session");
                return ExecutionOutcome::failure(&err);
            }
            Err(_) => {
                warn!("mailbox connect timed out");
                return ExecutionOutcome::Failure {
                    message: format!(
                        "Error: mailbox connect timed out after {}s",
                        self.timeout.as_secs()
                    ),
                    trace: None,
                };
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, session.run_command(fragment)).await
        {
            Ok(Ok(value)) => {
                debug!(command = fragment, output = %value, "command executed");
                ExecutionOutcome::Success(value)
            }
            Ok(Err(err)) => {
                warn!(command = fragment, error = %err, "command failed");
                ExecutionOutcome::failure(&err)
            }
            Err(_) => ExecutionOutcome::Failure {
                message: format!(
                    "Error: command timed out after {}s",
                    self.timeout.as_secs()
                ),
                trace: None,
            },
        };

        // Release the session whatever happened above.
        match tokio::time::timeout(self.timeout, session.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "failed to disconnect mailbox session"),
            Err(_) => warn!("mailbox disconnect timed out"),
        }

        outcome
    }
}
