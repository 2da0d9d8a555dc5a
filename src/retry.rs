//! Bounded retry with exponential backoff for gateway calls.
//!
//! Only [`crate::errors::Error::is_retryable`] failures (transport errors, timeouts,
//! 408/429/5xx) are replayed. Everything else is returned immediately.

use std::future::Future;
use std::time::Duration;

use crate::errors::Result;
#[cfg(test)]
use crate::errors::Error;
use crate::gateway::GatewayOperation;

/// Attempt budget and backoff base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included; at least 1
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the given failed attempt (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}

/// Runs `f` until it succeeds, fails terminally or the budget is spent
pub async fn retry<F, Fut, T>(policy: RetryPolicy, operation: GatewayOperation, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay(attempt);
                attempt += 1;
                tracing::warn!(
                    %operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "gateway call failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget_on_unavailable() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<()> = retry(RetryPolicy::default(), GatewayOperation::CreateRoute, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::gateway_unavailable(
                    GatewayOperation::CreateRoute,
                    "connection refused",
                ))
            }
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = retry(RetryPolicy::default(), GatewayOperation::UpsertService, || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::gateway_unavailable(
                        GatewayOperation::UpsertService,
                        "HTTP 502",
                    ))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_on_terminal_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<()> = retry(RetryPolicy::default(), GatewayOperation::UpdateRoute, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::gateway_not_found(
                    GatewayOperation::UpdateRoute,
                    "routes/abc",
                ))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::GatewayNotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
