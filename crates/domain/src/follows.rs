use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::DomainResult;
use crate::cdc::Row;
use crate::counters::{CountKind, Delta, DirtyScope};
use crate::error::DomainError;
use crate::ports::kv::{KvOp, KvPipeline, SortedSetStore};
use crate::ports::store::CountRepository;
use crate::util::now_secs;

pub const FOLLOW_CACHE_CAP: usize = 1000;
pub const FOLLOW_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDirection {
    Followers,
    Following,
}

impl FollowDirection {
    pub fn cache_key(self, user_id: u64) -> String {
        match self {
            FollowDirection::Followers => format!("user:follower:{user_id}"),
            FollowDirection::Following => format!("user:following:{user_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowEdge {
    pub follower_id: u64,
    pub following_id: u64,
    /// Unix seconds; the sorted-set score.
    pub created_at: i64,
}

impl FollowEdge {
    pub fn from_row(row: &Row) -> DomainResult<Self> {
        let follower_id = row.u64("follower_id");
        let following_id = row.u64("following_id");
        if follower_id == 0 || following_id == 0 {
            return Err(DomainError::Validation(
                "follow edge is missing a participant".to_string(),
            ));
        }
        if follower_id == following_id {
            return Err(DomainError::Validation(format!(
                "user {follower_id} cannot follow themselves"
            )));
        }
        let created_at = row
            .datetime("created_at")
            .map(|value| value.unix_timestamp())
            .unwrap_or_else(now_secs);
        Ok(Self {
            follower_id,
            following_id,
            created_at,
        })
    }

    /// Both sorted sets, both counters and the dirty mark for one event.
    pub fn cache_ops(&self, delta: Delta) -> Vec<KvOp> {
        let mut ops = Vec::with_capacity(9);
        side_ops(
            &mut ops,
            FollowDirection::Followers.cache_key(self.following_id),
            self.follower_id,
            self.created_at,
            delta,
        );
        side_ops(
            &mut ops,
            FollowDirection::Following.cache_key(self.follower_id),
            self.following_id,
            self.created_at,
            delta,
        );
        ops.push(delta.op(CountKind::UserFollower.cache_key(self.following_id)));
        ops.push(delta.op(CountKind::UserFollowing.cache_key(self.follower_id)));
        ops.push(KvOp::SetAdd {
            key: DirtyScope::Follow.key().to_string(),
            members: vec![self.follower_id.to_string(), self.following_id.to_string()],
        });
        ops
    }
}

/// Seeds a cold sorted set with the stored edges, trimmed and expiring.
fn fill_ops(key: &str, edges: &[(u64, i64)]) -> Vec<KvOp> {
    let mut ops: Vec<KvOp> = edges
        .iter()
        .map(|(member, score)| KvOp::SortedAdd {
            key: key.to_string(),
            member: member.to_string(),
            score: *score,
        })
        .collect();
    ops.push(KvOp::SortedTrim {
        key: key.to_string(),
        keep: FOLLOW_CACHE_CAP,
    });
    ops.push(KvOp::Expire {
        key: key.to_string(),
        ttl: FOLLOW_CACHE_TTL,
    });
    ops
}

fn side_ops(ops: &mut Vec<KvOp>, key: String, member: u64, score: i64, delta: Delta) {
    let member = member.to_string();
    match delta {
        Delta::Up => {
            ops.push(KvOp::SortedAdd {
                key: key.clone(),
                member,
                score,
            });
            ops.push(KvOp::SortedTrim {
                key: key.clone(),
                keep: FOLLOW_CACHE_CAP,
            });
        }
        Delta::Down => ops.push(KvOp::SortedRemove {
            key: key.clone(),
            member,
        }),
    }
    ops.push(KvOp::Expire {
        key,
        ttl: FOLLOW_CACHE_TTL,
    });
}

#[derive(Clone)]
pub struct FollowCacheWriter {
    pipeline: Arc<dyn KvPipeline>,
    sorted: Arc<dyn SortedSetStore>,
    truth: Arc<dyn CountRepository>,
}

impl FollowCacheWriter {
    pub fn new(
        pipeline: Arc<dyn KvPipeline>,
        sorted: Arc<dyn SortedSetStore>,
        truth: Arc<dyn CountRepository>,
    ) -> Self {
        Self {
            pipeline,
            sorted,
            truth,
        }
    }

    /// A follow landing on an expired set refills that set from the
    /// relational store first, so the cache never holds a partial list.
    pub async fn apply(&self, edge: &FollowEdge, delta: Delta) -> DomainResult<()> {
        let mut ops = Vec::new();
        if delta == Delta::Up {
            let sides = [
                (edge.following_id, FollowDirection::Followers),
                (edge.follower_id, FollowDirection::Following),
            ];
            for (user_id, direction) in sides {
                let key = direction.cache_key(user_id);
                if self.sorted.exists(&key).await? {
                    continue;
                }
                let edges = self
                    .truth
                    .recent_edges(user_id, direction, FOLLOW_CACHE_CAP)
                    .await?;
                ops.extend(fill_ops(&key, &edges));
            }
        }
        ops.extend(edge.cache_ops(delta));
        self.pipeline.execute(ops).await
    }

    /// Newest first. A cold cache is rebuilt from the relational store.
    pub async fn list(&self, user_id: u64, direction: FollowDirection) -> DomainResult<Vec<u64>> {
        let key = direction.cache_key(user_id);
        if self.sorted.exists(&key).await? {
            let members = self.sorted.range_desc(&key, FOLLOW_CACHE_CAP).await?;
            return Ok(members
                .into_iter()
                .filter_map(|(member, _)| member.parse().ok())
                .collect());
        }

        let edges = self
            .truth
            .recent_edges(user_id, direction, FOLLOW_CACHE_CAP)
            .await?;
        if edges.is_empty() {
            return Ok(Vec::new());
        }
        let ops = fill_ops(&key, &edges);
        self.pipeline.execute(ops).await?;
        debug!(key = %key, edges = edges.len(), "follow cache rebuilt");
        Ok(edges.into_iter().map(|(member, _)| member).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_follow_is_rejected() {
        let row = Row::from_pairs([("follower_id", "3"), ("following_id", "3")]);
        assert!(matches!(
            FollowEdge::from_row(&row),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn insert_ops_touch_both_sides() {
        let row = Row::from_pairs([
            ("follower_id", "3"),
            ("following_id", "5"),
            ("created_at", "2025-01-01 00:00:00"),
        ]);
        let edge = FollowEdge::from_row(&row).unwrap();
        let ops = edge.cache_ops(Delta::Up);
        assert!(ops.contains(&KvOp::SortedAdd {
            key: "user:follower:5".into(),
            member: "3".into(),
            score: 1_735_689_600,
        }));
        assert!(ops.contains(&KvOp::SortedAdd {
            key: "user:following:3".into(),
            member: "5".into(),
            score: 1_735_689_600,
        }));
        assert!(ops.contains(&KvOp::Incr {
            key: "user.follower:5".into()
        }));
        assert!(ops.contains(&KvOp::Incr {
            key: "user.following:3".into()
        }));
    }
}
