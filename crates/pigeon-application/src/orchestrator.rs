//! The per-turn command loop.
//!
//! One turn: append the user message, then request completions and run the
//! extracted commands until a reply carries no command block. Every command
//! produces exactly two developer messages - an echo of its text and its
//! outcome - appended and emitted in extraction order.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use pigeon_core::{Message, MessageRole, PigeonError, Transcript, TranscriptStore};
use pigeon_execution::{CommandExecutor, ExecutionOutcome, SafetyValidator, extract_commands};
use pigeon_interaction::{Oracle, to_wire};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::emitter::TurnEmitter;
use crate::prompt::PromptSet;

/// Loop bounds for one turn.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Ceiling on command-emission iterations within one turn.
    pub max_iterations: usize,
    /// Concurrency ceiling for validating/executing one extraction batch.
    pub command_concurrency: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_iterations: 16,
            command_concurrency: 4,
        }
    }
}

/// Drives the request/validate/execute/append cycle for one user turn.
///
/// The transcript is owned here and mutated only while the turn lock is
/// held; a second user message arriving mid-turn is rejected with
/// [`PigeonError::TurnBusy`] rather than interleaved.
pub struct TurnOrchestrator {
    oracle: Arc<dyn Oracle>,
    validator: SafetyValidator,
    executor: CommandExecutor,
    store: TranscriptStore,
    transcript: tokio::sync::Mutex<Transcript>,
    config: TurnConfig,
}

impl TurnOrchestrator {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        validator: SafetyValidator,
        executor: CommandExecutor,
        store: TranscriptStore,
        transcript: Transcript,
        config: TurnConfig,
    ) -> Self {
        Self {
            oracle,
            validator,
            executor,
            store,
            transcript: tokio::sync::Mutex::new(transcript),
            config,
        }
    }

    /// Seeds a brand-new transcript with the startup prompt.
    ///
    /// Returns `true` when the prompt was appended, `false` when the
    /// transcript already had history.
    pub async fn ensure_seeded(&self, prompts: &PromptSet) -> pigeon_core::Result<bool> {
        let mut transcript = self.transcript.lock().await;
        if !transcript.is_empty() {
            return Ok(false);
        }
        transcript.append(MessageRole::Developer, prompts.startup.clone());
        self.store.save(&transcript)?;
        Ok(true)
    }

    /// Returns a copy of the current transcript.
    pub async fn snapshot(&self) -> Transcript {
        self.transcript.lock().await.clone()
    }

    /// Runs one full turn for `user_input`.
    ///
    /// Messages are appended, persisted, and emitted in the order they are
    /// produced: user input, assistant reply, then per-command (echo,
    /// outcome) pairs in extraction order, repeating until a reply carries no
    /// commands or the iteration ceiling is hit. The returned slice holds
    /// every message the turn produced, in that same order.
    ///
    /// # Errors
    ///
    /// `TurnBusy` when another turn holds the lock; `Oracle` when a
    /// completion fails or comes back empty (a diagnostic message is
    /// appended and emitted first).
    pub async fn run_turn(
        &self,
        user_input: &str,
        emitter: &TurnEmitter,
    ) -> pigeon_core::Result<Vec<Message>> {
        let mut transcript = self
            .transcript
            .try_lock()
            .map_err(|_| PigeonError::TurnBusy)?;

        let mut produced = Vec::new();
        self.record(
            &mut transcript,
            &mut produced,
            emitter,
            MessageRole::User,
            user_input,
        )
        .await;
        self.persist(&transcript);

        let mut iterations = 0;
        loop {
            let reply = match self.oracle.complete(&to_wire(&transcript)).await {
                Ok(reply) => reply,
                Err(err) => {
                    error!(error = %err, "completion failed, aborting turn");
                    self.record(
                        &mut transcript,
                        &mut produced,
                        emitter,
                        MessageRole::Developer,
                        format!("The assistant service failed: {err}"),
                    )
                    .await;
                    self.persist(&transcript);
                    return Err(PigeonError::oracle(err.to_string()));
                }
            };

            // The reply is visible even when it carries zero commands.
            self.record(
                &mut transcript,
                &mut produced,
                emitter,
                MessageRole::Assistant,
                reply.clone(),
            )
            .await;
            self.persist(&transcript);

            let commands = extract_commands(&reply);
            if commands.is_empty() {
                debug!("reply carried no commands, turn complete");
                break;
            }

            // Bounded parallelism for latency only; `buffered` yields results
            // in extraction order, so appends below cannot be reordered.
            let results: Vec<(String, String)> = stream::iter(commands)
                .map(|command| self.process_command(command))
                .buffered(self.config.command_concurrency.max(1))
                .collect()
                .await;

            for (fragment, outcome) in results {
                self.record(
                    &mut transcript,
                    &mut produced,
                    emitter,
                    MessageRole::Developer,
                    fragment,
                )
                .await;
                self.record(
                    &mut transcript,
                    &mut produced,
                    emitter,
                    MessageRole::Developer,
                    outcome,
                )
                .await;
                self.persist(&transcript);
            }

            iterations += 1;
            if iterations >= self.config.max_iterations {
                warn!(
                    iterations,
                    "command iteration ceiling reached, ending turn"
                );
                self.record(
                    &mut transcript,
                    &mut produced,
                    emitter,
                    MessageRole::Developer,
                    format!(
                        "Reached the command iteration limit ({}); stopping this turn.",
                        self.config.max_iterations
                    ),
                )
                .await;
                self.persist(&transcript);
                break;
            }
        }

        Ok(produced)
    }

    /// Validates one command and, only if safe, executes it. Returns the
    /// fragment together with its rendered outcome text.
    async fn process_command(&self, fragment: String) -> (String, String) {
        let verdict = self.validator.check(&fragment).await;
        if !verdict.is_safe {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "no reason given".to_string());
            return (fragment, format!("Command is not safe to run: {reason}"));
        }

        let outcome = self.executor.execute(&fragment).await;
        (fragment, render_outcome(outcome))
    }

    async fn record(
        &self,
        transcript: &mut Transcript,
        produced: &mut Vec<Message>,
        emitter: &TurnEmitter,
        role: MessageRole,
        content: impl Into<String>,
    ) {
        let message = transcript.append(role, content).clone();
        emitter.emit(&message).await;
        produced.push(message);
    }

    fn persist(&self, transcript: &Transcript) {
        if let Err(err) = self.store.save(transcript) {
            warn!(error = %err, "failed to persist transcript");
        }
    }
}

/// Renders an execution outcome as transcript text: string values verbatim,
/// other values as pretty JSON, failures as message plus trace.
fn render_outcome(outcome: ExecutionOutcome) -> String {
    match outcome {
        ExecutionOutcome::Success(Value::String(text)) => text,
        ExecutionOutcome::Success(value) => {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
        }
        ExecutionOutcome::Failure {
            message,
            trace: Some(trace),
        } => format!("{message}\n{trace}"),
        ExecutionOutcome::Failure {
            message,
            trace: None,
        } => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pigeon_execution::{Mailbox, MailboxSession};
    use pigeon_interaction::{OracleError, WireMessage};
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeOracle {
        replies: Mutex<VecDeque<Result<String, OracleError>>>,
        calls: AtomicUsize,
        hang: bool,
    }

    impl FakeOracle {
        fn scripted(replies: &[&str]) -> Arc<Self> {
            let oracle = Self::default();
            for reply in replies {
                oracle
                    .replies
                    .lock()
                    .unwrap()
                    .push_back(Ok(reply.to_string()));
            }
            Arc::new(oracle)
        }

        fn failing() -> Arc<Self> {
            let oracle = Self::default();
            oracle
                .replies
                .lock()
                .unwrap()
                .push_back(Err(OracleError::Empty));
            Arc::new(oracle)
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                hang: true,
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl Oracle for FakeOracle {
        async fn complete(&self, _messages: &[WireMessage]) -> Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(OracleError::Empty))
        }
    }

    /// Safety oracle that answers every question the same way.
    struct ConstantOracle(&'static str);

    #[async_trait]
    impl Oracle for ConstantOracle {
        async fn complete(&self, _messages: &[WireMessage]) -> Result<String, OracleError> {
            Ok(self.0.to_string())
        }
    }

    enum Behavior {
        Value(Value),
        Fail(&'static str),
        DelayedValue(Duration, Value),
    }

    #[derive(Default)]
    struct FakeMailbox {
        behaviors: Mutex<HashMap<String, Behavior>>,
        connected: AtomicUsize,
        disconnected: AtomicUsize,
    }

    impl FakeMailbox {
        fn on(self: &Arc<Self>, fragment: &str, behavior: Behavior) {
            self.behaviors
                .lock()
                .unwrap()
                .insert(fragment.to_string(), behavior);
        }
    }

    struct FakeSession {
        mailbox: Arc<FakeMailbox>,
    }

    /// Local handle so the foreign `Mailbox` trait gets a local impl type.
    struct FakeMailboxHandle(Arc<FakeMailbox>);

    #[async_trait]
    impl Mailbox for FakeMailboxHandle {
        async fn connect(&self) -> anyhow::Result<Box<dyn MailboxSession>> {
            self.0.connected.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                mailbox: self.0.clone(),
            }))
        }
    }

    #[async_trait]
    impl MailboxSession for FakeSession {
        async fn run_command(&mut self, fragment: &str) -> anyhow::Result<Value> {
            let behavior = self.mailbox.behaviors.lock().unwrap().remove(fragment);
            match behavior {
                Some(Behavior::Value(value)) => Ok(value),
                Some(Behavior::Fail(message)) => Err(anyhow::anyhow!(message)),
                Some(Behavior::DelayedValue(delay, value)) => {
                    tokio::time::sleep(delay).await;
                    Ok(value)
                }
                None => Err(anyhow::anyhow!("unexpected fragment: {fragment}")),
            }
        }

        async fn disconnect(&mut self) -> anyhow::Result<()> {
            self.mailbox.disconnected.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        orchestrator: TurnOrchestrator,
        mailbox: Arc<FakeMailbox>,
        oracle: Arc<FakeOracle>,
        _dir: TempDir,
    }

    fn harness(oracle: Arc<FakeOracle>, safety_reply: &'static str) -> Harness {
        harness_with_config(oracle, safety_reply, TurnConfig::default())
    }

    fn harness_with_config(
        oracle: Arc<FakeOracle>,
        safety_reply: &'static str,
        config: TurnConfig,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        let mailbox = Arc::new(FakeMailbox::default());
        let executor = CommandExecutor::new(
            Arc::new(FakeMailboxHandle(mailbox.clone())),
            Duration::from_secs(5),
        );
        let validator = SafetyValidator::new(Arc::new(ConstantOracle(safety_reply)));
        let orchestrator = TurnOrchestrator::new(
            oracle.clone(),
            validator,
            executor,
            store,
            Transcript::new(),
            config,
        );
        Harness {
            orchestrator,
            mailbox,
            oracle,
            _dir: dir,
        }
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn reply_without_commands_ends_the_turn() {
        let h = harness(FakeOracle::scripted(&["no commands here"]), "SAFE");

        let produced = h
            .orchestrator
            .run_turn("hello", &TurnEmitter::batch())
            .await
            .unwrap();

        assert_eq!(contents(&produced), vec!["hello", "no commands here"]);
        assert_eq!(produced[0].role, MessageRole::User);
        assert_eq!(produced[1].role, MessageRole::Assistant);
        assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.mailbox.connected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn safe_command_yields_echo_then_outcome() {
        let reply = "Fetching:\n```imap\nFETCH 1\n```";
        let h = harness(FakeOracle::scripted(&[reply, "all done"]), "SAFE");
        h.mailbox.on("FETCH 1", Behavior::Value(json!(5)));

        let produced = h
            .orchestrator
            .run_turn("fetch the first mail", &TurnEmitter::batch())
            .await
            .unwrap();

        assert_eq!(
            contents(&produced),
            vec!["fetch the first mail", reply, "FETCH 1", "5", "all done"]
        );
        assert_eq!(produced[2].role, MessageRole::Developer);
        assert_eq!(produced[3].role, MessageRole::Developer);
        assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsafe_command_is_recorded_and_never_executed() {
        let reply = "```imap\nDELETE INBOX\n```";
        let h = harness(
            FakeOracle::scripted(&[reply, "understood"]),
            "touches filesystem",
        );

        let produced = h
            .orchestrator
            .run_turn("clean up", &TurnEmitter::batch())
            .await
            .unwrap();

        assert_eq!(
            produced[3].content,
            "Command is not safe to run: touches filesystem"
        );
        // No session was ever created.
        assert_eq!(h.mailbox.connected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_command_produces_outcome_and_releases_session() {
        let reply = "```imap\nEXPUNGE\n```";
        let h = harness(FakeOracle::scripted(&[reply, "noted"]), "SAFE");
        h.mailbox.on("EXPUNGE", Behavior::Fail("boom"));

        let produced = h
            .orchestrator
            .run_turn("expunge", &TurnEmitter::batch())
            .await
            .unwrap();

        assert!(produced[3].content.contains("Error: boom"));
        // Trace info rides along with the message.
        assert!(produced[3].content.len() > "Error: boom".len());
        assert_eq!(h.mailbox.connected.load(Ordering::SeqCst), 1);
        assert_eq!(h.mailbox.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn two_commands_keep_extraction_order_despite_durations() {
        let reply = "```imap\nSELECT INBOX\n```\n```imap\nNOOP\n```";
        let h = harness(FakeOracle::scripted(&[reply, "done"]), "SAFE");
        // The first command is slower than the second.
        h.mailbox.on(
            "SELECT INBOX",
            Behavior::DelayedValue(Duration::from_millis(100), json!("selected")),
        );
        h.mailbox.on("NOOP", Behavior::Value(json!("ok")));

        let produced = h
            .orchestrator
            .run_turn("check inbox", &TurnEmitter::batch())
            .await
            .unwrap();

        assert_eq!(
            contents(&produced),
            vec![
                "check inbox",
                reply,
                "SELECT INBOX",
                "selected",
                "NOOP",
                "ok",
                "done"
            ]
        );
    }

    #[tokio::test]
    async fn oracle_failure_aborts_with_diagnostic_message() {
        let h = harness(FakeOracle::failing(), "SAFE");
        let (emitter, mut rx) = TurnEmitter::streaming();

        let err = h
            .orchestrator
            .run_turn("hello", &emitter)
            .await
            .unwrap_err();
        assert!(err.is_oracle());
        drop(emitter);

        let mut streamed = Vec::new();
        while let Some(message) = rx.recv().await {
            streamed.push(message);
        }
        // The diagnostic is the final message pushed before the channel closed.
        let last = streamed.last().unwrap();
        assert_eq!(last.role, MessageRole::Developer);
        assert!(last.content.contains("The assistant service failed"));
    }

    #[tokio::test]
    async fn iteration_ceiling_stops_a_runaway_loop() {
        let reply = "```imap\nNOOP\n```";
        let oracle = FakeOracle::scripted(&[reply, reply, reply, reply]);
        let h = harness_with_config(
            oracle,
            "SAFE",
            TurnConfig {
                max_iterations: 2,
                command_concurrency: 4,
            },
        );
        h.mailbox.on("NOOP", Behavior::Value(json!("ok")));

        let produced = h
            .orchestrator
            .run_turn("loop", &TurnEmitter::batch())
            .await
            .unwrap();

        assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 2);
        assert!(
            produced
                .last()
                .unwrap()
                .content
                .contains("command iteration limit")
        );
    }

    #[tokio::test]
    async fn concurrent_turn_is_rejected_as_busy() {
        let h = Arc::new(harness(FakeOracle::hanging(), "SAFE"));

        let busy = h.clone();
        let first = tokio::spawn(async move {
            let _ = busy.orchestrator.run_turn("first", &TurnEmitter::batch()).await;
        });

        // Let the first turn take the lock.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = h
            .orchestrator
            .run_turn("second", &TurnEmitter::batch())
            .await
            .unwrap_err();
        assert!(err.is_turn_busy());
        first.abort();
    }

    #[tokio::test]
    async fn streaming_delivers_messages_in_transcript_order() {
        let reply = "```imap\nNOOP\n```";
        let h = harness(FakeOracle::scripted(&[reply, "bye"]), "SAFE");
        h.mailbox.on("NOOP", Behavior::Value(json!("ok")));
        let (emitter, mut rx) = TurnEmitter::streaming();

        let produced = h.orchestrator.run_turn("go", &emitter).await.unwrap();
        drop(emitter);

        let mut streamed = Vec::new();
        while let Some(message) = rx.recv().await {
            streamed.push(message);
        }
        assert_eq!(streamed, produced);
    }

    #[tokio::test]
    async fn ensure_seeded_only_seeds_an_empty_transcript() {
        let h = harness(FakeOracle::scripted(&["hi"]), "SAFE");
        let prompts = PromptSet::default();

        assert!(h.orchestrator.ensure_seeded(&prompts).await.unwrap());
        assert!(!h.orchestrator.ensure_seeded(&prompts).await.unwrap());

        let snapshot = h.orchestrator.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.messages()[0].role, MessageRole::Developer);
    }

    #[test]
    fn render_outcome_keeps_strings_verbatim_and_pretty_prints_values() {
        assert_eq!(
            render_outcome(ExecutionOutcome::Success(json!("plain"))),
            "plain"
        );
        assert_eq!(render_outcome(ExecutionOutcome::Success(json!(5))), "5");
        let rendered = render_outcome(ExecutionOutcome::Success(json!({"a": 1})));
        assert!(rendered.contains("\"a\": 1"));
        assert_eq!(
            render_outcome(ExecutionOutcome::Failure {
                message: "Error: boom".to_string(),
                trace: Some("at line 1".to_string()),
            }),
            "Error: boom\nat line 1"
        );
    }
}
