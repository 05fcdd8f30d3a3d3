//! Deterministic replay client.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{OracleRequest, ReasoningClient};
use crate::errors::OracleError;

/// Returns queued responses in order and records every request it receives.
///
/// Once the queue is empty the fallback response (if any) is returned
/// forever; without one, calls fail with a non-transient error.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<String, OracleError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `response`.
    pub fn repeating(response: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(response)
    }

    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.lock_requests().len()
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.lock_requests().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.lock_requests().iter().map(|r| r.prompt.clone()).collect()
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<OracleRequest>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ReasoningClient for ScriptedOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError> {
        self.lock_requests().push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| OracleError::NotConfigured("scripted responses exhausted".into())),
        }
    }
}
