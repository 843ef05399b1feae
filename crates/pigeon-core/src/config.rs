//! Environment-driven application configuration.
//!
//! Required settings come from the environment; loop bounds and timeouts
//! carry conservative defaults and can be overridden per deployment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PigeonError, Result};

const DEFAULT_MAIL_PORT: u16 = 143;
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_MAX_TURN_ITERATIONS: usize = 16;
const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_COMMAND_CONCURRENCY: usize = 4;

/// Connection settings for the remote mailbox.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct PigeonConfig {
    pub mail: MailConfig,
    /// API key for the completion oracle.
    pub openai_api_key: String,
    /// Model identifier sent with every completion request.
    pub model: String,
    /// Directory holding the persisted transcript (`chat.json`).
    pub chat_dir: PathBuf,
    /// Upper bound on command-emission iterations within one turn.
    pub max_turn_iterations: usize,
    /// Timeout applied to each oracle call.
    pub oracle_timeout: Duration,
    /// Timeout applied to each mailbox command execution.
    pub session_timeout: Duration,
    /// Concurrency ceiling for validating/executing one extraction batch.
    pub command_concurrency: usize,
}

impl PigeonConfig {
    /// Loads configuration from environment variables.
    ///
    /// Required: `MAIL_HOST`, `MAIL_USER`, `MAIL_PASS`, `OPENAI_API_KEY`.
    /// Optional with defaults: `MAIL_PORT` (143), `OPENAI_MODEL_NAME`
    /// (`gpt-4o`), `PIGEON_CHAT_DIR` (`.`), `PIGEON_MAX_TURN_ITERATIONS`,
    /// `PIGEON_ORACLE_TIMEOUT_SECS`, `PIGEON_SESSION_TIMEOUT_SECS`,
    /// `PIGEON_COMMAND_CONCURRENCY`.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when a required variable is missing or an
    /// optional one fails to parse.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mail: MailConfig {
                host: required("MAIL_HOST")?,
                port: optional_parsed("MAIL_PORT", DEFAULT_MAIL_PORT)?,
                user: required("MAIL_USER")?,
                password: required("MAIL_PASS")?,
            },
            openai_api_key: required("OPENAI_API_KEY")?,
            model: env::var("OPENAI_MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            chat_dir: env::var("PIGEON_CHAT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            max_turn_iterations: optional_parsed(
                "PIGEON_MAX_TURN_ITERATIONS",
                DEFAULT_MAX_TURN_ITERATIONS,
            )?,
            oracle_timeout: Duration::from_secs(optional_parsed(
                "PIGEON_ORACLE_TIMEOUT_SECS",
                DEFAULT_ORACLE_TIMEOUT_SECS,
            )?),
            session_timeout: Duration::from_secs(optional_parsed(
                "PIGEON_SESSION_TIMEOUT_SECS",
                DEFAULT_SESSION_TIMEOUT_SECS,
            )?),
            command_concurrency: optional_parsed(
                "PIGEON_COMMAND_CONCURRENCY",
                DEFAULT_COMMAND_CONCURRENCY,
            )?,
        })
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| PigeonError::config(format!("{name} is not set")))
}

fn optional_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| PigeonError::config(format!("{name} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}
