use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::DomainResult;
use crate::error::{Disposition, DomainError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(backoff_ms(
            self.base.as_millis() as u64,
            attempt,
            self.max.as_millis() as u64,
        ))
    }
}

pub fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = base_ms.saturating_mul(pow);
    delay.min(max_ms)
}

/// Runs `operation` until it returns something other than a retryable error
/// or the token is cancelled. There is no attempt limit.
pub async fn retry_until_cancelled<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> DomainResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DomainResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(DomainError::Cancelled),
            outcome = operation() => outcome,
        };
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.disposition() != Disposition::Retry => return Err(err),
            Err(err) => err,
        };
        attempt = attempt.saturating_add(1);
        let delay = policy.delay_for(attempt);
        warn!(
            label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "operation failed; retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(DomainError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_ms_returns_zero_for_zero_attempt() {
        assert_eq!(backoff_ms(100, 0, 5_000), 0);
    }

    #[test]
    fn backoff_doubles_from_base_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(6), Duration::from_millis(3_200));
        assert_eq!(policy.delay_for(7), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let value = retry_until_cancelled(RetryPolicy::default(), &cancel, "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(DomainError::Unavailable("flap".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let cancel = CancellationToken::new();
        let result: DomainResult<()> =
            retry_until_cancelled(RetryPolicy::default(), &cancel, "test", || async {
                Err(DomainError::Validation("bad".into()))
            })
            .await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            child.cancel();
        });
        let result: DomainResult<()> =
            retry_until_cancelled(RetryPolicy::default(), &cancel, "test", || async {
                Err(DomainError::Unavailable("down".into()))
            })
            .await;
        assert!(matches!(result, Err(DomainError::Cancelled)));
    }
}
