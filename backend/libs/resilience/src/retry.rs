/// Retry policy with exponential backoff, error classification and cancellation
use crate::metrics::RetryMetrics;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (the first attempt is not a retry)
    pub max_retries: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (1-based), without jitter.
    ///
    /// With `initial_backoff = 2s` and `backoff_multiplier = 2.0` this yields
    /// 2s, 4s, 8s, ... capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as i32;
        let millis =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    #[error("Non-retryable failure on attempt {attempt}: {error}")]
    NonRetryable { attempt: u32, error: E },
    #[error("Cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// Number of attempts that were started before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NonRetryable { attempt, .. } => *attempt,
            RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// The error returned by the last attempt, if one completed
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::NonRetryable { error, .. } => Some(error),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Execute a future with retry logic, treating every error as retryable
pub async fn with_retry<F, Fut, T, E>(config: RetryConfig, f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    with_retry_if(config, &CancellationToken::new(), |_: &E| true, f).await
}

/// Execute a future with retry logic, retrying only errors accepted by `is_retryable`
///
/// - A non-retryable error is returned after the attempt that produced it.
/// - Retryable errors are retried `max_retries` times, sleeping
///   [`RetryConfig::backoff_for`] between attempts.
/// - Cancelling `cancel` aborts the in-flight attempt or the backoff sleep and
///   returns [`RetryError::Cancelled`]; no further attempt is started.
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: RetryConfig,
    cancel: &CancellationToken,
    mut is_retryable: P,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    if cancel.is_cancelled() {
        return Err(RetryError::Cancelled { attempts: 0 });
    }

    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                RetryMetrics::record_attempts("cancelled", attempt);
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            outcome = f() => outcome,
        };

        let error = match outcome {
            Ok(result) => {
                RetryMetrics::record_attempts("success", attempt);
                return Ok(result);
            }
            Err(error) => error,
        };

        if !is_retryable(&error) {
            RetryMetrics::record_attempts("non_retryable", attempt);
            return Err(RetryError::NonRetryable { attempt, error });
        }

        if attempt > config.max_retries {
            warn!(
                attempts = attempt,
                error = %error,
                "Max retries ({}) reached",
                config.max_retries
            );
            RetryMetrics::record_attempts("exhausted", attempt);
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        let delay = calculate_backoff(config.backoff_for(attempt), config.jitter);

        warn!(
            attempt,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retry attempt {}/{}, waiting {:?}",
            attempt,
            config.max_retries,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                RetryMetrics::record_attempts("cancelled", attempt);
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fixed(max_retries: u32, initial_ms: u64) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_from_initial() {
        let config = fixed(3, 2_000);
        assert_eq!(config.backoff_for(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for(2), Duration::from_secs(4));
        assert_eq!(config.backoff_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_backoff: Duration::from_secs(5),
            ..fixed(10, 2_000)
        };
        assert_eq!(config.backoff_for(6), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(config, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(fixed(3, 10), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("temporary error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_keeps_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(fixed(2, 10), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move { Err::<i32, _>(format!("failure {}", count)) }
        })
        .await;

        match result {
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3); // Initial + 2 retries
                assert_eq!(last_error, "failure 2");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry_if(
            fixed(3, 10),
            &CancellationToken::new(),
            |err: &&str| *err != "fatal",
            move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>("fatal") }
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(RetryError::NonRetryable { attempt: 1, .. })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_timing() {
        let start = tokio::time::Instant::now();

        let _ = with_retry(fixed(3, 2_000), || async { Err::<i32, _>("error") }).await;

        // 2s + 4s + 8s between four attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(14));
        assert!(elapsed < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry_if(fixed(3, 10), &cancel, |_: &&str| true, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, &str>(()) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0 })));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_aborts_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let result = with_retry_if(fixed(3, 2_000), &cancel, |_: &&str| true, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("unreachable") }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
