//! OpenAI-compatible chat completions client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{OracleRequest, ReasoningClient, Role};
use crate::config::LlmConfig;
use crate::errors::OracleError;
use crate::util::truncate_chars;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct HttpReasoningClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpReasoningClient {
    pub fn new(config: &LlmConfig, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Build from configuration, reading the key from the configured variable.
    pub fn from_config(config: &LlmConfig) -> Result<Self, OracleError> {
        let api_key = config.api_key().ok_or_else(|| {
            OracleError::NotConfigured(format!(
                "set {} (or OPENAI_API_KEY) to an API key",
                config.api_key_env
            ))
        })?;
        Ok(Self::new(config, api_key))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn messages<'a>(&self, request: &'a OracleRequest) -> Vec<Message<'a>> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if !request.system.is_empty() {
            messages.push(Message {
                role: "system",
                content: &request.system,
            });
        }
        for turn in &request.history {
            messages.push(Message {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }
        messages.push(Message {
            role: "user",
            content: &request.prompt,
        });
        messages
    }
}

/// Map a non-success HTTP status to an error kind.
pub(crate) fn classify_status(status: u16, body: &str) -> OracleError {
    let body = truncate_chars(body, 300).to_string();
    match status {
        401 | 403 => OracleError::Auth(body),
        408 => OracleError::Timeout(std::time::Duration::ZERO),
        429 => OracleError::RateLimited(body),
        500..=599 => OracleError::Server { status, body },
        _ => OracleError::BadRequest { status, body },
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let body = ChatRequest {
            model: &self.model,
            messages: self.messages(request),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(std::time::Duration::ZERO)
                } else {
                    OracleError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OracleError::Connection(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            OracleError::Decode(format!("{}: {}", e, truncate_chars(&text, 200)))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Decode("response has no message content".to_string()))
    }
}
