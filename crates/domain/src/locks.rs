use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::kv::{DistributedLock, LockLease};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn user_detail_lock_key(user_id: u64) -> String {
    format!("lock:user-detail:{user_id}")
}

pub fn user_index_lock_key(user_id: u64) -> String {
    format!("lock:user-index:{user_id}")
}

pub fn user_metric_lock_key(user_id: u64) -> String {
    format!("lock:user-metric:{user_id}")
}

pub fn interest_init_lock_key(user_id: u64) -> String {
    format!("lock:interest:init:{user_id}")
}

#[derive(Clone)]
pub struct LockManager {
    lock: Arc<dyn DistributedLock>,
}

impl LockManager {
    pub fn new(lock: Arc<dyn DistributedLock>) -> Self {
        Self { lock }
    }

    /// Polls until the lease is granted, `wait` elapses, or the token fires.
    /// Timing out is reported as `Unavailable` so the caller's retry loop
    /// gets another go.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> DomainResult<LockLease> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(lease) = self.lock.try_acquire(key, ttl).await? {
                return Ok(lease);
            }
            if Instant::now() >= deadline {
                return Err(DomainError::Unavailable(format!("lock {key} is busy")));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(DomainError::Cancelled),
                _ = sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Single attempt; `None` when somebody else holds the key.
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> DomainResult<Option<LockLease>> {
        self.lock.try_acquire(key, ttl).await
    }

    pub async fn release(&self, lease: &LockLease) {
        match self.lock.release(lease).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %lease.key, "lock expired before release"),
            Err(err) => warn!(key = %lease.key, error = %err, "lock release failed"),
        }
    }

    pub async fn with_lock<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
        work: F,
    ) -> DomainResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let lease = self.acquire(key, ttl, ttl, cancel).await?;
        let outcome = work().await;
        self.release(&lease).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryKv;

    #[tokio::test]
    async fn second_holder_waits_for_release() {
        let kv = Arc::new(InMemoryKv::new());
        let locks = LockManager::new(kv);
        let cancel = CancellationToken::new();
        let lease = locks
            .acquire("lock:a", Duration::from_secs(5), Duration::ZERO, &cancel)
            .await
            .unwrap();

        let busy = locks
            .acquire("lock:a", Duration::from_secs(5), Duration::ZERO, &cancel)
            .await;
        assert!(matches!(busy, Err(DomainError::Unavailable(_))));

        locks.release(&lease).await;
        let value = locks
            .with_lock("lock:a", Duration::from_secs(5), &cancel, || async { Ok(3) })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn stale_token_cannot_release() {
        let kv = Arc::new(InMemoryKv::new());
        let lease = kv
            .try_acquire("lock:b", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        let forged = LockLease {
            key: lease.key.clone(),
            token: "other".into(),
        };
        assert!(!kv.release(&forged).await.unwrap());
        assert!(kv.release(&lease).await.unwrap());
    }
}
