//! Bounded exponential-backoff retry for outbound calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one (0 is treated as 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap applied to every delay, including upstream hints
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Create a policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay after failed attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// An upstream retry-after hint replaces the computed delay; both are capped.
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.max_delay),
            None => self.delay_for_attempt(attempt),
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts were made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

/// Classifies an error for [`retry_with_backoff`].
pub trait Retryable {
    /// Timeouts, rate limiting, server errors and transport failures.
    fn is_transient(&self) -> bool;

    /// Delay requested by the upstream, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Run `call` until it succeeds, fails permanently, or the policy is exhausted.
///
/// Non-transient errors are returned immediately without another attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.delay_with_hint(attempt, err.retry_after());
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_transient() {
                    warn!(operation, attempts = attempt, error = %err, "retries exhausted");
                }
                return Err(err);
            }
        }
    }
}
