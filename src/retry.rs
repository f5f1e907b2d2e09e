// ============================================================================
// SECTION 4: BOUNDED RETRY
// ============================================================================
// Linear-escalation retry for backing-store writes. Callers decide which
// failures are worth another attempt through an `is_transient` predicate, so
// this module stays independent of any particular driver.
// ============================================================================

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::constants::{MIRROR_MAX_RETRIES, MIRROR_RETRY_UNIT};

/// Retry policy: one initial attempt plus `max_retries` more, separated by
/// `unit * (2 * (retry - 1) + 1)`, i.e. 1s, 3s, 5s with a one-second unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MIRROR_MAX_RETRIES,
            unit: MIRROR_RETRY_UNIT,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            unit: Duration::ZERO,
        }
    }

    /// Delay before the given retry (1-based)
    #[inline]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let steps = retry.saturating_sub(1).saturating_mul(2).saturating_add(1);
        self.unit.saturating_mul(steps)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent. The last error is returned unchanged.
pub async fn retry_transient<T, E, F, Fut, P>(
    policy: RetryPolicy,
    operation: &'static str,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut retry = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_transient(&error) || retry >= policy.max_retries {
                    return Err(error);
                }

                retry += 1;
                let delay = policy.delay_for(retry);
                warn!(
                    target: "vitals::retry",
                    operation,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            unit: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_delay_ladder() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(3));
        assert_eq!(policy.delay_for(3), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_transient(fast_policy(), "test", |_| true, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("connection refused".to_string())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_transient(fast_policy(), "test", |_| false, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("unique violation".to_string())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), "unique violation");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<u32, String> = retry_transient(fast_policy(), "test", |_| true, || {
            let counter = counter.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err("reset".to_string())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }
}
