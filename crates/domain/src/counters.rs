use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::DomainResult;
use crate::ports::kv::{CounterStore, DirtySetStore, KvOp, KvPipeline};
use crate::ports::store::CountRepository;

pub const COUNT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
pub const COMMENT_LIKERS_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountKind {
    PostLike,
    PostCollect,
    PostComment,
    PostView,
    CommentLike,
    UserFollower,
    UserFollowing,
}

impl CountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CountKind::PostLike => "post.like",
            CountKind::PostCollect => "post.collect",
            CountKind::PostComment => "post.comment",
            CountKind::PostView => "post.view",
            CountKind::CommentLike => "comment.like",
            CountKind::UserFollower => "user.follower",
            CountKind::UserFollowing => "user.following",
        }
    }

    pub fn dirty_scope(self) -> DirtyScope {
        match self {
            CountKind::PostLike
            | CountKind::PostCollect
            | CountKind::PostComment
            | CountKind::PostView => DirtyScope::Post,
            CountKind::CommentLike => DirtyScope::CommentLike,
            CountKind::UserFollower | CountKind::UserFollowing => DirtyScope::Follow,
        }
    }

    pub fn cache_key(self, entity_id: u64) -> String {
        format!("{}:{entity_id}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyScope {
    Post,
    CommentLike,
    Follow,
    Interest,
}

impl DirtyScope {
    pub fn key(self) -> &'static str {
        match self {
            DirtyScope::Post => "dirty:post",
            DirtyScope::CommentLike => "dirty:comment_like",
            DirtyScope::Follow => "dirty:follow",
            DirtyScope::Interest => "dirty:interest",
        }
    }
}

pub fn comment_likers_key(comment_id: u64) -> String {
    format!("comment.like.users:{comment_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Up,
    Down,
}

impl Delta {
    pub fn op(self, key: String) -> KvOp {
        match self {
            Delta::Up => KvOp::Incr { key },
            Delta::Down => KvOp::Decr { key },
        }
    }
}

#[derive(Clone)]
pub struct CounterService {
    counters: Arc<dyn CounterStore>,
    dirty: Arc<dyn DirtySetStore>,
    pipeline: Arc<dyn KvPipeline>,
    truth: Arc<dyn CountRepository>,
}

impl CounterService {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        dirty: Arc<dyn DirtySetStore>,
        pipeline: Arc<dyn KvPipeline>,
        truth: Arc<dyn CountRepository>,
    ) -> Self {
        Self {
            counters,
            dirty,
            pipeline,
            truth,
        }
    }

    /// Atomic +1. Never initialised from relational truth and never clamped.
    pub async fn incr(&self, kind: CountKind, entity_id: u64) -> DomainResult<i64> {
        self.counters.incr(&kind.cache_key(entity_id)).await
    }

    /// Atomic -1. May go negative; the next reconciliation repairs it.
    pub async fn decr(&self, kind: CountKind, entity_id: u64) -> DomainResult<i64> {
        self.counters.decr(&kind.cache_key(entity_id)).await
    }

    /// Cached count, falling back to relational truth on a miss.
    pub async fn get(&self, kind: CountKind, entity_id: u64) -> DomainResult<i64> {
        let key = kind.cache_key(entity_id);
        if let Some(value) = self.counters.get(&key).await? {
            return Ok(value);
        }
        let value = self.truth.count(kind, entity_id).await?;
        self.counters
            .set(&key, value, Some(COUNT_CACHE_TTL))
            .await?;
        debug!(key = %key, value, "count cache filled from relational store");
        Ok(value)
    }

    pub async fn mark_dirty(&self, scope: DirtyScope, entity_ids: &[u64]) -> DomainResult<()> {
        let members: Vec<String> = entity_ids.iter().map(u64::to_string).collect();
        self.dirty.mark(scope.key(), &members).await
    }

    /// Bumps the counter and marks the entity dirty in one round-trip.
    pub async fn record(&self, kind: CountKind, entity_id: u64, delta: Delta) -> DomainResult<()> {
        self.pipeline
            .execute(vec![
                delta.op(kind.cache_key(entity_id)),
                KvOp::SetAdd {
                    key: kind.dirty_scope().key().to_string(),
                    members: vec![entity_id.to_string()],
                },
            ])
            .await
    }

    pub async fn track_comment_liker(
        &self,
        comment_id: u64,
        user_id: u64,
        delta: Delta,
    ) -> DomainResult<()> {
        let key = comment_likers_key(comment_id);
        let member = user_id.to_string();
        match delta {
            Delta::Up => {
                self.counters
                    .add_member(&key, &member, COMMENT_LIKERS_TTL)
                    .await
            }
            Delta::Down => self.counters.remove_member(&key, &member).await,
        }
    }

    /// Snapshot of the scope's dirty ids. Later marks land in a fresh set.
    pub async fn drain(&self, scope: DirtyScope) -> DomainResult<Vec<u64>> {
        let members = self.dirty.drain(scope.key()).await?;
        let mut ids: Vec<u64> = members
            .iter()
            .filter_map(|member| match member.parse::<u64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(scope = scope.key(), member = %member, "dropping malformed dirty member");
                    None
                }
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    pub async fn complete_drain(&self, scope: DirtyScope) -> DomainResult<()> {
        self.dirty.complete_drain(scope.key()).await
    }

    /// Recounts from relational truth and overwrites a skewed hot value.
    pub async fn reconcile(&self, kind: CountKind, entity_id: u64) -> DomainResult<i64> {
        let key = kind.cache_key(entity_id);
        let truth = self.truth.count(kind, entity_id).await?;
        let cached = self.counters.get(&key).await?;
        if cached != Some(truth) {
            if let Some(cached) = cached {
                warn!(key = %key, cached, truth, "counter skew repaired");
            }
            self.counters.set(&key, truth, Some(COUNT_CACHE_TTL)).await?;
        }
        Ok(truth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_kind_and_id() {
        assert_eq!(CountKind::PostLike.cache_key(42), "post.like:42");
        assert_eq!(CountKind::UserFollower.cache_key(5), "user.follower:5");
        assert_eq!(CountKind::PostView.dirty_scope().key(), "dirty:post");
        assert_eq!(CountKind::UserFollowing.dirty_scope().key(), "dirty:follow");
        assert_eq!(comment_likers_key(3), "comment.like.users:3");
    }
}
