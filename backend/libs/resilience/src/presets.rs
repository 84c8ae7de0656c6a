/// Preset configurations for the infrastructure this workspace talks to
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for a dependency type
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub retry: Option<RetryConfig>,
}

/// Message broker publishing (integration events)
///
/// - Timeout: 10s per attempt
/// - Retry: 3 retries, exponential backoff base 2 (2s, 4s, 8s), no jitter
pub fn broker_publish_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        retry: Some(RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }),
    }
}

/// Database bootstrap (initial pool connect at startup)
///
/// - Timeout: 5s per attempt
/// - Retry: 5 retries with jittered backoff; only safe because connecting
///   performs no writes
pub fn database_connect_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(5),
        },
        retry: Some(RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }),
    }
}
