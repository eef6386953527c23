//! Bounded retry with exponential backoff.
//!
//! Transient errors are retried up to `max_retries` times; anything else is
//! returned immediately. Waiting goes through the injected
//! [`Clock`], so tests run without real delay.
//!
//! Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5).

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::clock::Clock;
use crate::error::{OcrError, StoreError};

/// Errors that can tell whether another attempt may succeed.
pub trait Retryable: std::fmt::Display {
    fn is_transient(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

impl Retryable for OcrError {
    fn is_transient(&self) -> bool {
        OcrError::is_transient(self)
    }
}

/// The final error and how many attempts were made.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, E, F, Fut>(
        &self,
        clock: &dyn Clock,
        what: &str,
        mut op: F,
    ) -> Result<T, Exhausted<E>>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                clock.sleep(self.delay(attempt)).await;
            }
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt <= self.max_retries => {
                    warn!(what, attempt, %error, "transient failure, retrying");
                }
                Err(error) => {
                    return Err(Exhausted {
                        error,
                        attempts: attempt,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let clock = ManualClock::new();
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::new(3)
            .run(&clock, "get", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Transient("503".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let clock = ManualClock::new();
        let result: Result<(), _> = RetryPolicy::new(2)
            .run(&clock, "get", || async {
                Err(StoreError::Transient("503".into()))
            })
            .await;
        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert!(exhausted.error.is_transient());
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let clock = ManualClock::new();
        let result: Result<(), _> = RetryPolicy::new(5)
            .run(&clock, "get", || async {
                Err(StoreError::NotFound("k".into()))
            })
            .await;
        assert_eq!(result.unwrap_err().attempts, 1);
        assert!(clock.sleeps().is_empty());
    }
}
