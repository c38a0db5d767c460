//! Exponential-backoff retry for external calls.
//!
//! Every LLM and vector-store call goes through [`retry_with_backoff`]. There
//! is no jitter and no error classification: any failure is retried the same
//! way until the attempt budget is spent.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further failure.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// Delay slept after the failed attempt with 0-based index `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` calls have failed.
///
/// After failed attempt `i` (except the last) the task sleeps
/// `base_delay_ms * 2^i`. The error of the final attempt is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("{label} succeeded on attempt {}/{attempts}", attempt + 1);
                }
                return Ok(value);
            }
            Err(e) if attempt + 1 >= attempts => {
                tracing::warn!("{label} failed after {attempts} attempts: {e}");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{label} attempt {}/{attempts} failed: {e}; retrying in {}ms",
                    attempt + 1,
                    delay.as_millis()
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
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(5, 100);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(5, 1000);
        assert_eq!(policy.delay_for(80), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(4, 50);
        let counter = calls.clone();

        let result: Result<&str, String> = retry_with_backoff(&policy, "flaky", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("failure {n}"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_stops_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, 100);
        let counter = calls.clone();
        let start = Instant::now();

        let result: Result<(), String> = retry_with_backoff(&policy, "broken", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err(format!("failure {n}"))
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms after attempt 0, 200ms after attempt 1, nothing after the last
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_follow_exponential_schedule() {
        let stamps = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let policy = RetryPolicy::new(4, 10);
        let start = Instant::now();
        let log = stamps.clone();

        let _: Result<(), &str> = retry_with_backoff(&policy, "timed", || {
            let log = log.clone();
            async move {
                log.lock().push(start.elapsed());
                Err("nope")
            }
        })
        .await;

        let stamps = stamps.lock();
        assert_eq!(
            *stamps,
            vec![
                Duration::from_millis(0),
                Duration::from_millis(10),
                Duration::from_millis(30),
                Duration::from_millis(70),
            ]
        );
    }

    #[tokio::test]
    async fn test_always_succeeding_is_called_once_and_stable() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        for _ in 0..3 {
            let counter = calls.clone();
            let before = calls.load(Ordering::SeqCst);
            let result: Result<u32, String> = retry_with_backoff(&policy, "stable", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;
            assert_eq!(result.unwrap(), 42);
            assert_eq!(calls.load(Ordering::SeqCst), before + 1);
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once() {
        let policy = RetryPolicy::new(0, 10);
        let result: Result<(), &str> = retry_with_backoff(&policy, "zero", || async { Err("x") }).await;
        assert!(result.is_err());
    }
}
