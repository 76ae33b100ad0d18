//! Bounded retry with exponential backoff and jitter.
//!
//! Used for cluster calls that may fail transiently, most importantly the
//! deletion of spawned resources where a leaked object outlives the run.
//!
//! # Example
//!
//! ```ignore
//! use compliance_common::retry::{retry_with_backoff, RetryConfig};
//!
//! retry_with_backoff(
//!     &RetryConfig::cleanup(),
//!     "delete StatefulSet request-pvc",
//!     |e: &Error| e.is_retryable(),
//!     || async { ops.delete(&resource).await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Backoff policy for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one (always at least 1)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Policy used when deleting spawned resources
    pub fn cleanup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
        }
    }

    /// Policy with no waiting between attempts, for tests
    pub fn immediate(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Stops early when `should_retry` rejects the error. Returns the last error
/// once `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= max_attempts || !should_retry(&e) => {
                debug!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    "Giving up on operation"
                );
                return Err(e);
            }
            Err(e) => {
                let jitter = if delay.is_zero() {
                    1.0
                } else {
                    rand::thread_rng().gen_range(0.5..1.5)
                };
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let result: Result<i32, &str> =
            retry_with_backoff(&RetryConfig::immediate(3), "op", |_| true, || async { Ok(42) })
                .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> =
            retry_with_backoff(&RetryConfig::immediate(5), "op", |_| true, || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("fail")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        };

        let result: Result<i32, &str> = retry_with_backoff(&config, "op", |_| true, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("always fails")
            }
        })
        .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_stop_early() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> =
            retry_with_backoff(&RetryConfig::immediate(5), "op", |e| *e != "forbidden", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("forbidden")
                }
            })
            .await;

        assert_eq!(result, Err("forbidden"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryConfig::with_max_attempts(0).max_attempts, 1);
    }
}
