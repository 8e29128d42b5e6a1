use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::BoxFuture;
use crate::DomainResult;

/// One command inside a pipelined round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    SortedAdd {
        key: String,
        member: String,
        score: i64,
    },
    SortedRemove {
        key: String,
        member: String,
    },
    /// Keeps only the `keep` highest-scored members.
    SortedTrim {
        key: String,
        keep: usize,
    },
    Incr {
        key: String,
    },
    Decr {
        key: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    SetAdd {
        key: String,
        members: Vec<String>,
    },
}

pub trait KvPipeline: Send + Sync {
    /// Runs every op in a single transactional round-trip.
    fn execute(&self, ops: Vec<KvOp>) -> BoxFuture<'_, DomainResult<()>>;
}

pub trait CounterStore: Send + Sync {
    fn incr(&self, key: &str) -> BoxFuture<'_, DomainResult<i64>>;
    fn decr(&self, key: &str) -> BoxFuture<'_, DomainResult<i64>>;
    fn get(&self, key: &str) -> BoxFuture<'_, DomainResult<Option<i64>>>;
    fn set(&self, key: &str, value: i64, ttl: Option<Duration>)
    -> BoxFuture<'_, DomainResult<()>>;
    fn add_member(&self, key: &str, member: &str, ttl: Duration)
    -> BoxFuture<'_, DomainResult<()>>;
    fn remove_member(&self, key: &str, member: &str) -> BoxFuture<'_, DomainResult<()>>;
}

pub trait DirtySetStore: Send + Sync {
    fn mark(&self, key: &str, members: &[String]) -> BoxFuture<'_, DomainResult<()>>;
    /// Moves the live set aside under `<key>:processing` and returns its members.
    /// A processing set left by a failed run is merged rather than replaced.
    fn drain(&self, key: &str) -> BoxFuture<'_, DomainResult<Vec<String>>>;
    fn complete_drain(&self, key: &str) -> BoxFuture<'_, DomainResult<()>>;
}

pub trait SortedSetStore: Send + Sync {
    /// Highest scores first.
    fn range_desc(
        &self,
        key: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<(String, i64)>>>;
    fn exists(&self, key: &str) -> BoxFuture<'_, DomainResult<bool>>;
}

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'_, DomainResult<Option<String>>>;
    fn put(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, DomainResult<()>>;
    fn delete(&self, keys: &[String]) -> BoxFuture<'_, DomainResult<()>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub key: String,
    pub token: String,
}

pub trait DistributedLock: Send + Sync {
    fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, DomainResult<Option<LockLease>>>;
    /// Releases only when the stored token still matches the lease.
    fn release(&self, lease: &LockLease) -> BoxFuture<'_, DomainResult<bool>>;
}

pub trait Publisher: Send + Sync {
    fn publish(&self, channel: &str, payload: &str) -> BoxFuture<'_, DomainResult<()>>;
}
