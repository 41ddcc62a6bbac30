//! Retry with exponential backoff for calls that fail transiently.
//!
//! Used for kube client construction and service account token issuance.
//! Authorization verification has its own polling loop in the harness crate
//! because it retries on *negative answers*, not only on errors.
//!
//! # Example
//!
//! ```ignore
//! use mlflow_rbac_common::retry::{retry_with_backoff, RetryConfig};
//!
//! let token = retry_with_backoff(
//!     &RetryConfig::token_request(),
//!     "create_token_request",
//!     || async { request_token(&api, "test-user-abcd").await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, error};

/// Backoff settings for a retried operation.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_multiplier: f64,
    /// Randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Settings for TokenRequest issuance: 5 attempts from 1s, x1.5, no jitter
    pub fn token_request() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
            jitter: false,
        }
    }

    fn sleep_for(&self, delay: Duration) -> Duration {
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(delay.as_secs_f64() * factor)
        } else {
            delay
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Execute an async operation, retrying failures with exponential backoff.
///
/// Returns the first success, or the last error once `max_attempts` is
/// exhausted. With `max_attempts == 0` this retries forever.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let sleep = config.sleep_for(delay);
                debug!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = sleep.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(sleep).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let result: Result<i32, &str> =
            retry_with_backoff(&fast(3), "op", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<&str, String> = retry_with_backoff(&fast(5), "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("token not issued yet".to_string())
                } else {
                    Ok("eyJ.payload.sig")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("eyJ.payload.sig"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<i32, &str> = retry_with_backoff(&fast(3), "op", || {
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

    /// Token issuance waits 1s, 1.5s, 2.25s, 3.375s between its five attempts
    #[tokio::test(start_paused = true)]
    async fn token_request_backoff_is_deterministic() {
        let start = tokio::time::Instant::now();
        let result: Result<(), &str> =
            retry_with_backoff(&RetryConfig::token_request(), "token", || async {
                Err("empty token")
            })
            .await;

        assert!(result.is_err());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(8125), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(8200), "{elapsed:?}");
    }

    #[test]
    fn next_delay_is_capped() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(2),
            ..RetryConfig::token_request()
        };
        assert_eq!(
            config.next_delay(Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }
}
