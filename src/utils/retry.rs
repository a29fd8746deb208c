//! Exponential backoff shared by the script generators and TTS providers.
//!
//! Every attempt and every backoff sleep races the caller's cancellation
//! token, so a cancelled job never waits out a sleep and never mistakes its
//! own cancellation for a provider timeout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a failed attempt should be treated by [`retry_with_backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Try again, waiting at least `min_wait` if the server asked for it.
    Retry { min_wait: Option<Duration> },
    /// A deadline expired. Retried only while the caller is still live.
    Timeout,
    /// Never retried.
    Fatal,
}

pub trait Retryable {
    fn retry_hint(&self) -> RetryHint;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::script_defaults()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
            multiplier,
        }
    }

    /// Script generation: 3 attempts, 1s, doubling.
    pub fn script_defaults() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0)
    }

    /// Speech synthesis is the usual rate-limit bottleneck: 5 attempts, 2s, doubling.
    pub fn tts_defaults() -> Self {
        Self::new(5, Duration::from_secs(2), 2.0)
    }

    /// Delay before retry number `retry` (0 = the wait after the first failure).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(30) as i32);
        let millis = (self.initial_delay_ms as f64 * factor).min(u64::MAX as f64 / 2.0);
        Duration::from_millis(millis as u64)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Terminal outcome of a retried operation.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed in a way that retrying cannot fix.
    Fatal(E),
    /// Every attempt failed; `last` is the final error.
    Exhausted { attempts: u32, last: E },
    /// The caller's token was cancelled.
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Fatal(e) => write!(f, "{}", e),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
            RetryError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` until it succeeds, fails fatally, exhausts the policy, or `cancel` fires.
///
/// `op` receives the 1-based attempt number. The wait before the next attempt
/// is `max(backoff, server_min_wait)`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = op(attempt) => result,
        };

        let err = match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let min_wait = match err.retry_hint() {
            RetryHint::Fatal => {
                tracing::warn!(label, attempt, error = %err, "non-retryable failure");
                return Err(RetryError::Fatal(err));
            }
            RetryHint::Timeout if cancel.is_cancelled() => return Err(RetryError::Cancelled),
            RetryHint::Timeout => None,
            RetryHint::Retry { min_wait } => min_wait,
        };

        if attempt >= max_attempts {
            tracing::warn!(label, attempts = attempt, error = %err, "retry budget exhausted");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let backoff = policy.backoff(attempt - 1);
        let wait = match min_wait {
            Some(server_wait) => backoff.max(server_wait),
            None => backoff,
        };
        tracing::warn!(
            label,
            attempt,
            max_attempts,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "attempt failed, backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
