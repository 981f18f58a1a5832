//! Exponential backoff with jitter for recoverable errors.

use crate::domain::config::RetryConfig;
use mesh_types::UnifiedError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay before retry number `attempt + 1`, before jitter.
pub fn backoff_delay(attempt: u32, base_delay: Duration, max_delay: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(30));
    base_delay.saturating_mul(factor).min(max_delay)
}

/// Run `operation` until it succeeds, fails with a non-recoverable error, or
/// `max_retries` retries are used up.
///
/// Each wait is drawn uniformly from the upper half of the backoff delay, so
/// it never exceeds `max_delay`.
pub async fn exponential_backoff_retry<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
) -> Result<T, UnifiedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UnifiedError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(retries = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.recoverable && attempt < max_retries => {
                let delay = backoff_delay(attempt, base_delay, max_delay);
                let jittered = delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0));
                attempt += 1;
                warn!(
                    code = %err.code,
                    attempt = attempt,
                    max_retries = max_retries,
                    delay_ms = jittered.as_millis() as u64,
                    "Retrying after recoverable error"
                );
                tokio::time::sleep(jittered).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`exponential_backoff_retry`] with limits from configuration.
pub async fn retry_with<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, UnifiedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UnifiedError>>,
{
    exponential_backoff_retry(operation, config.max_retries, config.base_delay, config.max_delay)
        .await
}
