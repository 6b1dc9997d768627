// components/release_downloader/src/retry.rs
//
// Two retry layers: exponential backoff per HTTP request, and a linear
// backoff around the whole acquisition of one release.

use crate::error::FetchError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Per-request retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts in total, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure; doubled for each further failure
    pub base_delay: Duration,
    /// Hard cap on the computed delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Result of a single attempt
pub enum RetryAction<T> {
    Success(T),
    /// Network failure or 5xx
    Retry(FetchError),
    /// 4xx or anything else a repeat cannot fix
    Fail(FetchError),
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, FetchError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt + 1 >= max_attempts {
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// Connect, timeout, request, body and decode errors are worth repeating
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

/// Whole-release retry: delay grows linearly with the attempt number
#[derive(Debug, Clone)]
pub struct ReleaseRetry {
    pub max_attempts: u32,
    pub unit: Duration,
}

impl Default for ReleaseRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            unit: Duration::from_secs(10),
        }
    }
}

impl ReleaseRetry {
    /// Delay after failed attempt number `attempt` (1-indexed)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(attempt)
    }
}
