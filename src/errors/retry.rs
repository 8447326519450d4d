use std::future::Future;
use std::time::Duration;

use super::types::WardenError;
use tracing::warn;

/// Retry configuration for infrastructure operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self { max_retries: 0, ..Default::default() }
    }

    /// Exponential backoff with up to 25% random jitter, capped at `max_delay`.
    ///
    /// `attempt` is 0-indexed: the delay before the first retry is roughly
    /// `base_delay`, then `2 * base_delay`, `4 * base_delay`, ...
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2.0_f64.powi(attempt.min(16) as i32);
        let jitter = base * 0.25 * rand::random::<f64>();
        let secs = (base + jitter).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Execute an async operation with retry logic.
///
/// Retries only if the error is classified as retryable and `max_retries`
/// has not been exceeded. Returns the result together with the number of
/// attempts made.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut factory: F,
) -> (Result<T, WardenError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WardenError>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match factory().await {
            Ok(result) => return (Ok(result), attempt + 1),
            Err(e) => {
                let classification = e.classify();

                if !classification.retryable {
                    warn!(
                        operation = operation_name,
                        error_type = classification.error_type,
                        "Non-retryable error, failing immediately"
                    );
                    return (Err(e), attempt + 1);
                }
                if attempt + 1 >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max = max_attempts,
                        "Max retries exhausted"
                    );
                    return (Err(e), attempt + 1);
                }

                let delay = config.retry_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = max_attempts,
                    error_type = classification.error_type,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        let d0 = config.retry_delay(0).as_secs_f64();
        let d1 = config.retry_delay(1).as_secs_f64();
        assert!((1.0..=1.25).contains(&d0));
        assert!((2.0..=2.5).contains(&d1));
        assert_eq!(config.retry_delay(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let (result, attempts) = with_retry("test", &RetryConfig::default(), || async {
            Ok::<_, WardenError>(42)
        }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_infrastructure_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let config = RetryConfig { max_retries: 3, ..Default::default() };

        let (result, attempts) = with_retry("launch", &config, || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WardenError::Infrastructure("runtime unavailable".into()))
                } else {
                    Ok("container-1")
                }
            }
        }).await;

        assert_eq!(result.unwrap(), "container-1");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let (result, attempts) = with_retry("test", &RetryConfig::default(), || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(WardenError::ToolError("exit 2".into()))
            }
        }).await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_is_bounded() {
        let config = RetryConfig { max_retries: 2, ..Default::default() };
        let (result, attempts) = with_retry("test", &config, || async {
            Err::<(), _>(WardenError::Infrastructure("no such image".into()))
        }).await;

        assert!(matches!(result, Err(WardenError::Infrastructure(_))));
        assert_eq!(attempts, 3);
    }
}
