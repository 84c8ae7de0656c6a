/// Timeout wrapper for async operations
use crate::metrics::TimeoutMetrics;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    #[error("Operation timed out after {0:?}")]
    Elapsed(Duration),
}

/// Execute a future with timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(value) => {
            TimeoutMetrics::record_operation("completed");
            Ok(value)
        }
        Err(_) => {
            TimeoutMetrics::record_operation("elapsed");
            Err(TimeoutError::Elapsed(duration))
        }
    }
}

/// Execute a fallible future with timeout, folding an elapsed deadline into
/// the caller's own error type
pub async fn with_timeout_or<F, T, E, O>(
    duration: Duration,
    future: F,
    on_elapsed: O,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    O: FnOnce(Duration) -> E,
{
    match with_timeout(duration, future).await {
        Ok(result) => result,
        Err(TimeoutError::Elapsed(after)) => Err(on_elapsed(after)),
    }
}
