//! Per-request timeout and bounded retry for completion calls.

use super::{CompletionClient, CompletionError, CompletionRequest};
use std::time::Duration;

/// How a single completion is bounded and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline applied to every attempt.
    pub timeout: Duration,
    /// Extra attempts after the first one, only for transient errors.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(1 << attempt.min(16))
    }
}

/// Send `request`, retrying transient failures with exponential backoff.
///
/// `on_attempt` runs before every attempt, including the first.
pub async fn complete_with_retry<F>(
    client: &dyn CompletionClient,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    on_attempt: F,
) -> Result<String, CompletionError>
where
    F: Fn(u32) + Send + Sync,
{
    let mut attempt = 0;
    loop {
        on_attempt(attempt);
        let result = match tokio::time::timeout(policy.timeout, client.complete(request.clone())).await
        {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout),
        };

        match result {
            Ok(text) => return Ok(text),
            Err(error) if error.is_transient() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    error = %error,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Completion failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
