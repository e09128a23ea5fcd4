// src/common/retry.rs

use std::future::Future;
use std::time::Duration;

use crate::db::TableError;

/// Bounded exponential backoff for idempotent reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Zero behaves like one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Runs `call` until it succeeds, fails with a non-transient error, or
    /// the attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, TableError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TableError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient table error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        };
        let result = policy
            .run("get", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TableError::Transient("throttled".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::ZERO,
        };
        let result: Result<(), _> = policy
            .run("query", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TableError::Transient("timeout".into()))
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_errors_are_returned_at_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::default()
            .run("get", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TableError::Backend("access denied".into()))
            })
            .await;
        assert!(matches!(result, Err(TableError::Backend(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
