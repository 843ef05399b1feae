//! The mailbox session capability.
//!
//! A session is a short-lived, single-use connection: created, used for one
//! command, and torn down by the executor regardless of outcome. The core
//! treats the capability as opaque; `TcpMailbox` is the concrete IMAP
//! implementation.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use pigeon_core::MailConfig;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

/// One live, exclusively-owned connection to the mailbox.
#[async_trait]
pub trait MailboxSession: Send {
    /// Runs a single protocol command fragment and returns its result as a
    /// JSON value. The fragment is the only thing that crosses; the session
    /// itself is the only capability the fragment can reach.
    async fn run_command(&mut self, fragment: &str) -> Result<Value>;

    /// Tears the connection down. Called on every exit path.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Factory for single-use mailbox sessions.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Opens a fresh authenticated session.
    async fn connect(&self) -> Result<Box<dyn MailboxSession>>;
}

/// IMAP mailbox over a plain TCP connection.
///
/// Fragments are raw IMAP command lines (without the tag); the session
/// assigns tags, collects untagged response lines, and reports the tagged
/// completion status. TLS termination is left to the deployment.
pub struct TcpMailbox {
    config: MailConfig,
}

impl TcpMailbox {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailbox for TcpMailbox {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>> {
        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .with_context(|| {
                format!(
                    "failed to connect to {}:{}",
                    self.config.host, self.config.port
                )
            })?;
        let (read_half, write_half) = stream.into_split();
        let mut session = TcpSession {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_tag: 0,
        };

        let greeting = session.read_line().await.context("no server greeting")?;
        if !greeting.starts_with("* ") {
            bail!("unexpected greeting from server: {greeting}");
        }

        let login = format!(
            "LOGIN {} {}",
            quote(&self.config.user),
            quote(&self.config.password)
        );
        let response = session.dispatch(&login).await.context("login failed")?;
        if response.status != "OK" {
            bail!("login rejected: {}", response.detail);
        }

        Ok(Box::new(session))
    }
}

struct TcpSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_tag: u32,
}

struct TaggedResponse {
    status: String,
    detail: String,
    lines: Vec<String>,
}

impl TcpSession {
    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .context("failed to read from mailbox")?;
        if read == 0 {
            bail!("mailbox closed the connection");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Sends one tagged command and collects response lines until the tagged
    /// completion for it arrives.
    async fn dispatch(&mut self, command: &str) -> Result<TaggedResponse> {
        self.next_tag += 1;
        let tag = format!("P{:04}", self.next_tag);

        self.writer
            .write_all(format!("{tag} {command}\r\n").as_bytes())
            .await
            .context("failed to write to mailbox")?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if let Some(rest) = line.strip_prefix(&tag) {
                let rest = rest.trim_start();
                let (status, detail) = rest.split_once(' ').unwrap_or((rest, ""));
                return Ok(TaggedResponse {
                    status: status.to_string(),
                    detail: detail.to_string(),
                    lines,
                });
            }
            lines.push(line);
        }
    }
}

#[async_trait]
impl MailboxSession for TcpSession {
    async fn run_command(&mut self, fragment: &str) -> Result<Value> {
        // Narrow surface: exactly one command line may cross per execution.
        if fragment.contains('\r') || fragment.contains('\n') {
            bail!("fragment must be a single protocol command line");
        }
        if fragment.trim().is_empty() {
            bail!("fragment is empty");
        }

        debug!(command = fragment, "dispatching mailbox command");
        let response = self.dispatch(fragment.trim()).await?;

        // NO/BAD are protocol-level answers the model should see, not
        // transport failures.
        Ok(json!({
            "status": response.status,
            "detail": response.detail,
            "lines": response.lines,
        }))
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Best-effort logout; the connection is dropped either way.
        let _ = self.dispatch("LOGOUT").await;
        self.writer
            .shutdown()
            .await
            .context("failed to shut down mailbox connection")?;
        Ok(())
    }
}

/// Quotes an IMAP string argument.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn spawn_server(
        script: Vec<(&'static str, Vec<&'static str>)>,
    ) -> (std::net::SocketAddr, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"* OK pigeon test server\r\n").await.unwrap();

            let mut received = Vec::new();
            let mut buf = vec![0u8; 4096];
            for (_expected, reply_lines) in script {
                let n = socket.read(&mut buf).await.unwrap();
                let line = String::from_utf8_lossy(&buf[..n]).to_string();
                let tag = line.split_whitespace().next().unwrap().to_string();
                received.push(line.trim_end().to_string());

                for reply in &reply_lines {
                    let rendered = reply.replace("{tag}", &tag);
                    socket
                        .write_all(format!("{rendered}\r\n").as_bytes())
                        .await
                        .unwrap();
                }
            }
            received
        });

        (addr, handle)
    }

    fn config(addr: std::net::SocketAddr) -> MailConfig {
        MailConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            user: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    #[tokio::test]
    async fn connect_logs_in_and_run_command_collects_untagged_lines() {
        let (addr, server) = spawn_server(vec![
            ("login", vec!["{tag} OK logged in"]),
            (
                "list",
                vec!["* LIST () \"/\" INBOX", "{tag} OK LIST completed"],
            ),
            ("logout", vec!["* BYE", "{tag} OK bye"]),
        ])
        .await;

        let mailbox = TcpMailbox::new(config(addr));
        let mut session = mailbox.connect().await.unwrap();

        let value = session.run_command("LIST \"\" \"*\"").await.unwrap();
        assert_eq!(value["status"], "OK");
        assert_eq!(value["lines"][0], "* LIST () \"/\" INBOX");

        session.disconnect().await.unwrap();
        let received = server.await.unwrap();
        assert!(received[0].starts_with("P0001 LOGIN \"user\" \"pass\""));
        assert!(received[1].ends_with("LIST \"\" \"*\""));
        assert!(received[2].ends_with("LOGOUT"));
    }

    #[tokio::test]
    async fn silent_server_times_out_instead_of_hanging_the_executor() {
        use crate::executor::{CommandExecutor, ExecutionOutcome};
        use std::sync::Arc;
        use std::time::Duration;

        // Accepts the TCP connection but never sends a greeting.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(socket);
        });

        let executor = CommandExecutor::new(
            Arc::new(TcpMailbox::new(config(addr))),
            Duration::from_millis(200),
        );
        let outcome = tokio::time::timeout(Duration::from_secs(2), executor.execute("NOOP"))
            .await
            .expect("execute must return within the session timeout");

        match outcome {
            ExecutionOutcome::Failure { message, .. } => {
                assert!(message.contains("connect timed out"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn rejected_login_is_an_error() {
        let (addr, _server) =
            spawn_server(vec![("login", vec!["{tag} NO invalid credentials"])]).await;

        let mailbox = TcpMailbox::new(config(addr));
        let err = match mailbox.connect().await {
            Ok(_) => panic!("login should have been rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("login rejected"));
    }

    #[tokio::test]
    async fn protocol_level_failure_is_a_result_not_an_error() {
        let (addr, _server) = spawn_server(vec![
            ("login", vec!["{tag} OK logged in"]),
            ("bogus", vec!["{tag} BAD unknown command"]),
        ])
        .await;

        let mailbox = TcpMailbox::new(config(addr));
        let mut session = mailbox.connect().await.unwrap();

        let value = session.run_command("BOGUS").await.unwrap();
        assert_eq!(value["status"], "BAD");
    }

    #[tokio::test]
    async fn multi_line_fragments_never_reach_the_wire() {
        let (addr, _server) = spawn_server(vec![("login", vec!["{tag} OK logged in"])]).await;

        let mailbox = TcpMailbox::new(config(addr));
        let mut session = mailbox.connect().await.unwrap();

        let err = session
            .run_command("NOOP\r\nA2 DELETE INBOX")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("single protocol command line"));
    }
}
