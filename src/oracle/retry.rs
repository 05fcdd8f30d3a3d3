//! Per-call timeout and bounded retry for transient service failures.

use std::time::Duration;

use tracing::warn;

use super::{OracleRequest, ReasoningClient};
use crate::errors::OracleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Applied to every individual call
    pub timeout: Duration,
    /// Extra tries after the first, transient failures only
    pub retries: u32,
    /// Delay before the first retry; doubles each time
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Call the service under `policy`.
///
/// Timeouts, rate limits, 5xx and connection errors are retried up to
/// `policy.retries` times; any other error is returned immediately.
pub async fn call_with_retry(
    client: &dyn ReasoningClient,
    request: &OracleRequest,
    policy: &RetryPolicy,
) -> Result<String, OracleError> {
    let mut retry = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, client.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(policy.timeout)),
        };

        match result {
            Ok(text) => return Ok(text),
            Err(e) if e.is_transient() && retry < policy.retries => {
                let delay = policy.backoff(retry);
                retry += 1;
                warn!(
                    error = %e,
                    retry,
                    max_retries = policy.retries,
                    delay_ms = delay.as_millis() as u64,
                    "transient reasoning-service failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
