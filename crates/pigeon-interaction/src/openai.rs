//! OpenAiOracle - Direct REST implementation for the OpenAI Chat Completions API.
//!
//! Calls the API directly without CLI dependency. Configuration comes from
//! [`PigeonConfig`] or environment variables.

use async_trait::async_trait;
use pigeon_core::PigeonConfig;
use reqwest::{Client, StatusCode, header::HeaderValue};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::{Oracle, OracleError, WireMessage};

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Oracle implementation that talks to the OpenAI HTTP API.
#[derive(Clone)]
pub struct OpenAiOracle {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl OpenAiOracle {
    /// Creates a new oracle with the provided API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Builds an oracle from the application configuration.
    pub fn from_config(config: &PigeonConfig) -> Self {
        Self::new(config.openai_api_key.clone(), config.model.clone())
            .with_timeout(config.oracle_timeout)
    }

    /// Loads configuration from environment variables
    /// (`OPENAI_API_KEY`, `OPENAI_MODEL_NAME`).
    ///
    /// Model name defaults to `gpt-4o` if not specified.
    pub fn try_from_env() -> Result<Self, OracleError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| OracleError::Request {
            message: "OPENAI_API_KEY not found in environment variables".into(),
            retryable: false,
        })?;
        let model = env::var("OPENAI_MODEL_NAME").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.into());
        Ok(Self::new(api_key, model))
    }

    /// Overrides the model after construction.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send_request(&self, body: &ChatCompletionRequest<'_>) -> Result<String, OracleError> {
        let response = self
            .client
            .post(BASE_URL)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|err| OracleError::Request {
                message: format!("OpenAI API request failed: {err}"),
                retryable: err.is_connect() || err.is_timeout(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read OpenAI error body".to_string());
            return Err(map_http_error(status, body_text, retry_after));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| OracleError::Malformed(err.to_string()))?;

        extract_text_response(parsed)
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn complete(&self, messages: &[WireMessage]) -> Result<String, OracleError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
        };

        self.send_request(&request).await
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: String,
    messages: &'a [WireMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[allow(dead_code)]
    r#type: Option<String>,
    #[allow(dead_code)]
    code: Option<String>,
}

fn extract_text_response(response: ChatCompletionResponse) -> Result<String, OracleError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(OracleError::Empty)?;

    if content.trim().is_empty() {
        return Err(OracleError::Empty);
    }
    Ok(content)
}

fn map_http_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> OracleError {
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or(body);

    let retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    );

    OracleError::Http {
        status: status.as_u16(),
        message,
        retryable,
        retry_after,
    }
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    // Retry-After HTTP-date parsing is omitted for simplicity
    None
}
