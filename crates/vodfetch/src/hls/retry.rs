// HLS Retry Utility: retry-with-backoff shared by segment fetching.
//
// The delay between attempts comes from a pluggable `BackoffStrategy` so
// tests can run the retry loop without wall-clock waits.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Computes how long to wait after a failed attempt.
///
/// `attempt` is 1-based: it is the number of the attempt that just failed.
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
    fn delay(&self, attempt: u32) -> Duration;
}

/// `attempt × step`: 1 s, 2 s, 3 s, ... with the default step.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    pub step: Duration,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(1),
        }
    }
}

impl BackoffStrategy for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

/// `base × 2^(attempt-1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        // checked_shl keeps absurd attempt numbers from overflowing
        let multiplier = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base
            .checked_mul(multiplier)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Retry immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl BackoffStrategy for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Adapts a plain function or closure into a [`BackoffStrategy`].
pub struct FnBackoff<F>(pub F);

impl<F> BackoffStrategy for FnBackoff<F>
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        (self.0)(attempt)
    }
}

impl<F> fmt::Debug for FnBackoff<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnBackoff")
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T, E> {
    Success(T),
    /// Transient failure; try again if attempts remain.
    Retry(E),
    /// Permanent failure; give up immediately.
    Fail(E),
}

/// How a retry loop ended without success.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The last error seen and the number of attempts made.
    Failed { error: E, attempts: u32 },
    Cancelled,
}

/// Execute an async operation with retry-and-backoff.
///
/// `operation` receives the 1-based attempt number. At most `max_attempts`
/// attempts are made (a value of 0 is treated as 1). The cancellation
/// token is checked before every attempt and raced against every backoff
/// sleep.
pub async fn retry_with_backoff<F, Fut, T, E>(
    max_attempts: u32,
    backoff: &dyn BackoffStrategy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
    E: fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(error) => {
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                });
            }
            RetryAction::Retry(error) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Failed {
                        error,
                        attempts: attempt,
                    });
                }
                let delay = backoff.delay(attempt);
                warn!(
                    attempt,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
