//! Bounded retry with exponential backoff for calls to remote collaborators.
//!
//! Every attempt runs under a timeout; a timed-out attempt is reported as
//! [`AppError::Timeout`] and handled like any other transient failure.
//! Only errors for which [`AppError::is_transient`] holds are retried.

use crate::error::AppError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
    /// Whether to add jitter to backoff duration.
    pub add_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(10),
            add_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt, still bounded by the timeout.
    pub fn single_attempt(&self) -> Self {
        Self {
            max_retries: 0,
            ..self.clone()
        }
    }

    /// Calculate backoff duration for a given attempt.
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);

        if self.add_jitter {
            // up to 25%
            let jitter = (backoff_ms as f64 * 0.25 * rand_jitter()) as u64;
            duration += Duration::from_millis(jitter);
        }

        duration
    }
}

fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Run `f` until it succeeds, fails permanently, or the retry budget is spent.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &str,
    f: F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;

    loop {
        let result = match timeout(policy.attempt_timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{} exceeded {}ms",
                operation,
                policy.attempt_timeout.as_millis()
            ))),
        };

        match result {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation,
                        attempt = attempt + 1,
                        "Call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= policy.max_retries => {
                warn!(
                    operation = operation,
                    attempt = attempt + 1,
                    error = %err,
                    "Call failed after max retries"
                );
                return Err(err);
            }
            Err(err) => {
                let backoff = policy.backoff_duration(attempt);
                warn!(
                    operation = operation,
                    attempt = attempt + 1,
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "Call failed, retrying after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_millis(200),
            add_jitter: false,
        }
    }

    #[test]
    fn test_backoff_duration() {
        let policy = RetryPolicy {
            add_jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&fast_policy(), "flaky", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::ServiceUnavailable)
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_with_backoff(&fast_policy(), "validate", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::BadRequest(anyhow::anyhow!("invoice is not a draft")))
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(10),
            ..fast_policy()
        }
        .single_attempt();

        let result = retry_with_backoff(&policy, "slow", || async {
            sleep(Duration::from_millis(200)).await;
            Ok::<_, AppError>(())
        })
        .await;

        assert!(matches!(result, Err(AppError::Timeout(_))));
    }
}
