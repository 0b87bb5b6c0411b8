//! Bounded retry of optimistic-lock conflicts

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

use super::context::RequestContext;

/// How often, and how patiently, a read-modify-write cycle is retried
///
/// Only `Conflict` errors are retried. The wait before attempt `k + 1` is
/// `base_delay * 2^(k - 1)`: 100 ms, 200 ms, 400 ms and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }

    /// Backoff after the failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails with a non-conflict error, or the
    /// attempt budget is spent
    ///
    /// `op` receives the attempt number and must re-read whatever state it
    /// depends on.
    pub async fn run<T, F, Fut>(&self, ctx: &RequestContext, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            ctx.check(operation)?;

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_conflict() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        wait_ms = delay.as_millis() as u64,
                        error = %e,
                        "Version conflict, retrying after backoff"
                    );
                    ctx.run(operation, async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        operation = operation,
                        attempts = attempt,
                        "Version conflict persisted, giving up"
                    );
                    return Err(Error::RetryExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_retried_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = RetryPolicy::default()
            .run(&RequestContext::new(), "update_node", |attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(Error::conflict("node", "n1", "stale"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_is_distinct_error() {
        let err = RetryPolicy::default()
            .run(&RequestContext::new(), "update_node", |_| async {
                Err::<(), _>(Error::conflict("node", "n1", "stale"))
            })
            .await
            .unwrap_err();

        assert!(err.is_retry_exhausted());
        assert_eq!(err.code(), "E401");
        match err {
            Error::RetryExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run(&RequestContext::new(), "update_node", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::not_found("node", "n1")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.code(), "E200");
    }
}
