//! Completion gateway for the remote chat-completion service.
//!
//! The service is stateless: every call resends the full ordered transcript.
//! Uses reqwest for transport, with a bounded retry for transient failures.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::transcript::{Message, Role};

/// User-Agent string identifying this client
const USER_AGENT: &str = concat!(
    "dossier/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/cladam/dossier)"
);

/// Timeout for a single completion request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Retry policy for transient transport failures
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Returned when the service answers with a well-formed but empty completion.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response.";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion service returned status {0}")]
    Status(StatusCode),
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Boundary to one remote chat-completion endpoint.
///
/// The empty-but-well-formed case is not an error: implementations return the
/// fixed fallback string so the transcript never shows an error object as if
/// it were model output.
#[async_trait]
pub trait CompletionGateway {
    async fn complete(&self, messages: &[Message]) -> Result<String, GatewayError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Deserialize, Default)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Default)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize, Default)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the reply text out of a decoded response, degrading to the fallback
/// when any of response, choice, message, or content is missing or blank.
fn reply_text(response: ChatResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_REPLY.to_string())
}

/// Gateway speaking the OpenAI-compatible chat API exposed by OpenRouter.
pub struct OpenRouterGateway {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenRouterGateway {
    /// Build a gateway from loaded configuration. Fails fast on a missing
    /// credential, before any session work starts.
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let api_key = config.api_key()?.to_string();
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                config.agent.base_url.trim_end_matches('/')
            ),
            api_key,
            model: config.agent.model.clone(),
            referer: config.agent.referer.clone(),
            title: config.agent.title.clone(),
        })
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<ChatResponse, GatewayError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request);
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            builder = builder.header("X-Title", title);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status));
        }
        Ok(response.json::<ChatResponse>().await?)
    }
}

/// Transient failures worth another attempt: connection-level errors and
/// server-side (5xx) statuses. Client errors and undecodable payloads are not.
fn is_transient(error: &GatewayError) -> bool {
    match error {
        GatewayError::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
        GatewayError::Status(status) => status.is_server_error(),
        GatewayError::Config(_) => false,
    }
}

#[async_trait]
impl CompletionGateway for OpenRouterGateway {
    async fn complete(&self, messages: &[Message]) -> Result<String, GatewayError> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
        };

        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.send_once(&request).await {
                Ok(response) => return Ok(reply_text(response)),
                Err(e) if attempt < MAX_ATTEMPTS && is_transient(&e) => {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{reply_text, ChatResponse, FALLBACK_REPLY};

    fn decode(value: serde_json::Value) -> ChatResponse {
        serde_json::from_value(value).expect("response should decode")
    }

    #[test]
    fn reply_text_returns_first_choice_content() {
        let response = decode(serde_json::json!({
            "choices": [
                {"message": {"role": "assistant", "content": "the summary"}},
                {"message": {"role": "assistant", "content": "ignored"}}
            ]
        }));
        assert_eq!(reply_text(response), "the summary");
    }

    #[test]
    fn missing_choices_degrades_to_fallback() {
        let response = decode(serde_json::json!({}));
        assert_eq!(reply_text(response), FALLBACK_REPLY);
    }

    #[test]
    fn missing_message_degrades_to_fallback() {
        let response = decode(serde_json::json!({"choices": [{}]}));
        assert_eq!(reply_text(response), FALLBACK_REPLY);
    }

    #[test]
    fn null_or_blank_content_degrades_to_fallback() {
        let null = decode(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        }));
        assert_eq!(reply_text(null), FALLBACK_REPLY);

        let blank = decode(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "   "}}]
        }));
        assert_eq!(reply_text(blank), FALLBACK_REPLY);
    }
}
