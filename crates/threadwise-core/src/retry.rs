//! Exponential backoff for provider calls.
//!
//! The embedder and the language-model summary strategy share one policy:
//! rate-limited, transient and timed-out calls are retried until
//! `max_retries` attempts have been made, permanent failures return at
//! once. The delay before retry `n` (0-based) is
//! `min(base_delay · 2^n + uniform(0, 1s), max_delay)`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::ProviderError;

/// Upper bound of the uniform jitter added to every delay.
const JITTER_MS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// The error that ended a [`RetryPolicy::run`].
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub error: ProviderError,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms as f64 * 2f64.powi(attempt.min(32) as i32);
        let jitter = rand::rng().random_range(0.0..JITTER_MS);
        let ms = (exp + jitter).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Call `op` until it succeeds, fails permanently, or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt - 1);
                    warn!(
                        operation,
                        attempt,
                        kind = %e.kind,
                        delay_ms = delay.as_millis() as u64,
                        "provider call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        error,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = policy();
        let first = p.backoff(0);
        assert!(first >= Duration::from_millis(1000));
        assert!(first < Duration::from_millis(2000));
        let third = p.backoff(2);
        assert!(third >= Duration::from_millis(4000));
        assert!(third < Duration::from_millis(5000));
        assert_eq!(p.backoff(20), Duration::from_millis(60_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = &AtomicU32::new(0);
        let result = policy()
            .run("test", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ProviderError::new(ProviderErrorKind::RateLimited, "slow down"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let err = policy()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::timeout("stalled"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.error.kind, ProviderErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_returns_at_once() {
        let calls = &AtomicU32::new(0);
        let err = policy()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::permanent("bad request"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
