//! Reasoning-service boundary.
//!
//! The controller only ever sees [`ReasoningClient`]; the real implementation
//! talks to an OpenAI-compatible chat endpoint, the scripted one replays canned
//! responses for tests and dry runs.

pub mod http;
pub mod retry;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::OracleError;

pub use http::HttpReasoningClient;
pub use retry::{RetryPolicy, call_with_retry};
pub use scripted::ScriptedOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A prior exchange replayed to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OracleRequest {
    /// System instructions
    pub system: String,
    pub prompt: String,
    pub history: Vec<Turn>,
}

impl OracleRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    /// Total characters sent, for logging.
    pub fn size(&self) -> usize {
        self.system.len()
            + self.prompt.len()
            + self.history.iter().map(|t| t.content.len()).sum::<usize>()
    }
}

/// Text-in/text-out reasoning service. Output is untrusted.
///
/// Real implementation: `HttpReasoningClient`. Test double: `ScriptedOracle`.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError>;
}
