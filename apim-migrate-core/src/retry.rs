//! Bounded retry with linear backoff for calls to the indexing service.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Attempts made against the indexing service before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Worth trying again (network error, non-2xx status).
    Transient(E),
    /// Trying again cannot help (undecodable body, unserialisable request).
    Permanent(E),
}

#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    /// Every attempt failed transiently.
    Exhausted { error: E, attempts: u32 },
    /// An attempt failed permanently; no further attempts were made.
    Aborted { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Aborted { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Ok(value),
            RetryOutcome::Exhausted { error, .. } | RetryOutcome::Aborted { error, .. } => {
                Err(error)
            }
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, or `policy.max_attempts`
/// attempts have been made. `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> RetryOutcome<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                }
            }
            Err(AttemptError::Permanent(error)) => {
                warn!(operation, attempt, reason = %error, "Attempt failed, not retryable");
                return RetryOutcome::Aborted {
                    error,
                    attempts: attempt,
                };
            }
            Err(AttemptError::Transient(error)) => {
                warn!(operation, attempt, max_attempts, reason = %error, "Attempt failed");
                if attempt >= max_attempts {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: attempt,
                    };
                }
            }
        }
        if !policy.backoff.is_zero() {
            tokio::time::sleep(policy.backoff * attempt).await;
        }
        attempt += 1;
    }
}
