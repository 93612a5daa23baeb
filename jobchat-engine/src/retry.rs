//! Retry policy with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use shared::config::ConnectionConfig;
use tracing::warn;

use crate::error::FetchError;

/// Delays double from `initial_backoff` up to `max_backoff`, each one
/// jittered by up to 30% either way.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Policy for REST snapshot fetches.
    #[must_use]
    pub fn for_fetches(config: &ConnectionConfig) -> Self {
        Self {
            max_retries: config.fetch_retry_attempts,
            initial_backoff: Duration::from_millis(config.fetch_retry_backoff_ms),
            ..Self::default()
        }
    }

    /// Policy for re-opening a dropped push stream. Never gives up.
    #[must_use]
    pub fn for_reconnects(config: &ConnectionConfig) -> Self {
        Self {
            max_retries: u32::MAX,
            initial_backoff: Duration::from_millis(config.reconnect_initial_ms),
            max_backoff: Duration::from_millis(config.reconnect_max_ms),
        }
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }

    /// Jittered delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay(attempt)
            .mul_f64(rand::rng().random_range(0.7..1.3))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Max retries ({retries}) exceeded: {last}")]
    MaxRetriesExceeded { retries: u32, last: E },
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl From<RetryError<FetchError>> for FetchError {
    fn from(error: RetryError<FetchError>) -> Self {
        match error {
            RetryError::MaxRetriesExceeded { retries, last } => Self::Exhausted {
                attempts: retries.saturating_add(1),
                last: Box::new(last),
            },
            RetryError::OperationFailed(error) => error,
        }
    }
}

/// Execute a future with retry logic. Errors for which `should_retry`
/// returns false fail immediately.
pub async fn with_retry<F, Fut, T, E, P>(
    config: RetryConfig,
    should_retry: P,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !should_retry(&error) {
                    return Err(RetryError::OperationFailed(error));
                }

                attempt += 1;
                if attempt > config.max_retries {
                    warn!(max_retries = config.max_retries, error = %error, "Max retries reached");
                    return Err(RetryError::MaxRetriesExceeded {
                        retries: config.max_retries,
                        last: error,
                    });
                }

                let delay = config.delay_for(attempt);
                warn!(
                    attempt,
                    max_retries = config.max_retries,
                    ?delay,
                    error = %error,
                    "Retrying after failure"
                );
                counter!("jobchat_fetch_retries_total").increment(1);

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(quick(), |_| true, move || {
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

    #[tokio::test]
    async fn test_retry_max_retries_exceeded() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), _> = with_retry(quick(), |_| true, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err("persistent error") }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { retries: 2, last: "persistent error" })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), _> = with_retry(quick(), |_| false, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err("forbidden") }
        })
        .await;

        assert!(matches!(result, Err(RetryError::OperationFailed("forbidden"))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..Default::default()
        };

        assert_eq!(config.base_delay(1), Duration::from_millis(100));
        assert_eq!(config.base_delay(2), Duration::from_millis(200));
        assert_eq!(config.base_delay(3), Duration::from_millis(350));
        assert_eq!(config.base_delay(u32::MAX), Duration::from_millis(350));

        let jittered = config.delay_for(10);
        assert!(jittered >= Duration::from_millis(245));
        assert!(jittered <= Duration::from_millis(455));
    }

    #[test]
    fn test_exhausted_fetch_error_counts_attempts() {
        let error: FetchError = RetryError::MaxRetriesExceeded {
            retries: 2,
            last: FetchError::status(503, "down"),
        }
        .into();
        assert!(matches!(error, FetchError::Exhausted { attempts: 3, .. }));
    }
}
