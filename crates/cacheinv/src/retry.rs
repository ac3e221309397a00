//! Retry-with-backoff for fallible async operations.
//!
//! Used on the outbound publish path only. Inbound message handling never
//! sleeps, so backoff delays cannot stall the transport's message task.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// `base * 2^attempt`
    #[default]
    Exponential,
    /// `base` between every attempt
    Fixed,
}

/// Retry policy: one initial attempt plus up to `max_retries` retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    max_retries: u32,
    base_delay: Duration,
    backoff: Backoff,
}

impl RetryExecutor {
    pub fn new(max_retries: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay to wait after the failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
        }
    }

    /// Run `op` until it succeeds or the retry budget is exhausted.
    ///
    /// Returns the last error once all `max_retries + 1` attempts failed.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "Operation succeeded on retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= self.max_retries => {
                    error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Like [`RetryExecutor::execute`], but yields `default` after exhaustion.
    pub async fn execute_or<T, E, F, Fut>(&self, default: T, op: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute(op).await.unwrap_or(default)
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000), Backoff::Exponential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delays_double() {
        let retry = RetryExecutor::new(3, Duration::from_millis(100), Backoff::Exponential);
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_fixed_delays_constant() {
        let retry = RetryExecutor::new(3, Duration::from_millis(100), Backoff::Fixed);
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(5), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let retry = RetryExecutor::new(3, Duration::from_millis(100), Backoff::Exponential);
        let calls = Arc::new(AtomicU32::new(0));

        let started = tokio::time::Instant::now();
        let counter = calls.clone();
        let result: Result<u64, String> = retry
            .execute(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(format!("failure {n}")) } else { Ok(7) }
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms after the first failure, 200ms after the second
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let retry = RetryExecutor::new(2, Duration::from_millis(10), Backoff::Fixed);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), String> = retry
            .execute(|| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {n}"))
                }
            })
            .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_or_returns_default() {
        let retry = RetryExecutor::new(1, Duration::from_millis(10), Backoff::Exponential);
        let delivered = retry
            .execute_or(0u64, || async { Err::<u64, _>("unreachable host") })
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_zero_retries_runs_once() {
        let retry = RetryExecutor::new(0, Duration::from_millis(10), Backoff::Exponential);
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("nope") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
