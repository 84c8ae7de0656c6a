/// Resilience patterns for calls into flaky infrastructure
///
/// This library provides:
/// - **Retry**: Exponential backoff with optional jitter, a caller-supplied
///   retryability classifier, and cooperative cancellation
/// - **Timeout**: Time limits on individual attempts
/// - **Preset Configurations**: Pre-tuned settings for broker publishing and
///   database bootstrap
///
/// # Example: Publishing with classified retries
///
/// ```rust,no_run
/// use resilience::{presets, retry::with_retry_if};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::broker_publish_config();
///     let cancel = CancellationToken::new();
///
///     let result = with_retry_if(
///         config.retry.unwrap_or_default(),
///         &cancel,
///         |err: &String| !err.starts_with("auth"),
///         || async {
///             // Your broker call here
///             Ok::<_, String>(())
///         },
///     )
///     .await;
///     let _ = result;
/// }
/// ```
///
/// # Example: Attempt with Timeout
///
/// ```rust,no_run
/// use resilience::{presets, timeout::with_timeout};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::database_connect_config();
///
///     let result = with_timeout(config.timeout.duration, async {
///         // Your database connect
///         42
///     })
///     .await;
///     let _ = result;
/// }
/// ```

pub mod metrics;
pub mod presets;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use presets::{broker_publish_config, database_connect_config, ServiceConfig};
pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_or, TimeoutConfig, TimeoutError};
