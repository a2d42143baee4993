//! Retry helper with optional exponential backoff
//!
//! Used by callers that want transparent retries for Warning-severity
//! failures. Restart policy for crashed units lives in the recovery
//! engine, not here.

use std::future::Future;
use std::time::Duration;

use crate::core::error::ErrorRecord;

/// Retry policy: how many retries and how the delay between them grows.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total calls = max_retries + 1)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Double the delay after each failed attempt
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            exponential: false,
        }
    }

    /// Exponential policy starting at `initial_delay`.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            exponential: true,
        }
    }
}

/// Call `op` until it succeeds or the policy is exhausted.
///
/// On each failure the error is logged, the configured delay elapses,
/// and the delay doubles when exponential mode is enabled. After the
/// final failure the last error is recorded as a handled failure and
/// returned to the caller.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    E: std::error::Error,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    "Operation failed, retrying in {:?}: {}",
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                if policy.exponential {
                    delay *= 2;
                }
            }
            Err(err) => {
                let record = ErrorRecord::from_error(&err)
                    .with_context("retries", attempt.to_string());
                tracing::error!(
                    category = ?record.category,
                    "Operation failed after {} retries: {}",
                    attempt,
                    err
                );
                return Err(err);
            }
        }
    }
}
