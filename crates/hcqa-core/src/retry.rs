//! Fixed-delay retry for calls to external providers
//!
//! [`with_retry`] wraps any fallible async operation. Only errors for which
//! [`HcqaError::is_transient`] holds are retried; everything else is
//! returned immediately. Each attempt can carry its own timeout, and a
//! timed-out attempt counts as transient.

use crate::{HcqaError, Result, RetryConfig};
use std::future::Future;
use std::time::Duration;

/// Bounded fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts (1 = no retry)
    pub max_attempts: u32,

    /// Sleep between attempts
    pub delay: Duration,

    /// Upper bound on a single attempt
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Fixed delay between at most `max_attempts` attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempt_timeout: None,
        }
    }

    /// Single attempt, no retry
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::fixed(config.max_attempts, Duration::from_millis(config.delay_ms))
    }

    /// Bound each attempt by `timeout`
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `op` under `policy`, returning the first success or the last error.
///
/// `operation` names the call in log output.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.delay).await;
        }

        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result,
                Err(_) => Err(HcqaError::Timeout(limit)),
            },
            None => op().await,
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Transient failure"
                );
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    tracing::error!(operation, max_attempts, "All retry attempts failed");
    Err(last_err
        .unwrap_or_else(|| HcqaError::Transient(format!("{operation}: no attempts made"))))
}
