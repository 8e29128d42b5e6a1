use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::DomainResult;
use crate::counters::DirtyScope;
use crate::locks::{LockManager, interest_init_lock_key};
use crate::ports::kv::{KvOp, KvPipeline, SortedSetStore};
use crate::ports::store::{ContentRepository, InterestRepository};
use crate::util::now_ms;

pub const INTEREST_CAP: usize = 100;
pub const INTEREST_TTL: Duration = Duration::from_secs(24 * 3600);
pub const INTEREST_INIT_LOCK_TTL: Duration = Duration::from_secs(5);
const VIEW_TAG_LIMIT: usize = 2;

pub fn interest_key(user_id: u64) -> String {
    format!("user:interest:{user_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestSnapshot {
    pub user_id: u64,
    pub interests: BTreeMap<String, i64>,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestAction {
    Like,
    Collect,
    View,
}

impl InterestAction {
    fn tag_limit(self) -> usize {
        match self {
            InterestAction::View => VIEW_TAG_LIMIT,
            InterestAction::Like | InterestAction::Collect => usize::MAX,
        }
    }
}

#[derive(Clone)]
pub struct InterestRecorder {
    pipeline: Arc<dyn KvPipeline>,
    sorted: Arc<dyn SortedSetStore>,
    repository: Arc<dyn InterestRepository>,
    content: Arc<dyn ContentRepository>,
    locks: LockManager,
}

impl InterestRecorder {
    pub fn new(
        pipeline: Arc<dyn KvPipeline>,
        sorted: Arc<dyn SortedSetStore>,
        repository: Arc<dyn InterestRepository>,
        content: Arc<dyn ContentRepository>,
        locks: LockManager,
    ) -> Self {
        Self {
            pipeline,
            sorted,
            repository,
            content,
            locks,
        }
    }

    /// Bumps the user's interest set with the post's AI tags.
    pub async fn record(
        &self,
        user_id: u64,
        post_id: u64,
        action: InterestAction,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        if user_id == 0 {
            return Ok(());
        }
        let tags: Vec<String> = self
            .content
            .post_tags(post_id)
            .await?
            .map(|tags| tags.ai_tags)
            .unwrap_or_default()
            .into_iter()
            .take(action.tag_limit())
            .collect();
        if tags.is_empty() {
            debug!(user_id, post_id, "post has no tags to learn from");
            return Ok(());
        }

        self.ensure_loaded(user_id, cancel).await?;
        let key = interest_key(user_id);
        let score = now_ms();
        let mut ops: Vec<KvOp> = tags
            .into_iter()
            .map(|tag| KvOp::SortedAdd {
                key: key.clone(),
                member: tag,
                score,
            })
            .collect();
        ops.push(KvOp::SortedTrim {
            key: key.clone(),
            keep: INTEREST_CAP,
        });
        ops.push(KvOp::Expire {
            key,
            ttl: INTEREST_TTL,
        });
        ops.push(KvOp::SetAdd {
            key: DirtyScope::Interest.key().to_string(),
            members: vec![user_id.to_string()],
        });
        self.pipeline.execute(ops).await
    }

    /// Restores an expired set from the last snapshot before it is bumped.
    async fn ensure_loaded(&self, user_id: u64, cancel: &CancellationToken) -> DomainResult<()> {
        let key = interest_key(user_id);
        if self.sorted.exists(&key).await? {
            return Ok(());
        }
        self.locks
            .with_lock(
                &interest_init_lock_key(user_id),
                INTEREST_INIT_LOCK_TTL,
                cancel,
                || async {
                    if self.sorted.exists(&key).await? {
                        return Ok(());
                    }
                    let Some(snapshot) = self.repository.get(user_id).await? else {
                        return Ok(());
                    };
                    if snapshot.interests.is_empty() {
                        return Ok(());
                    }
                    let mut ops: Vec<KvOp> = snapshot
                        .interests
                        .iter()
                        .map(|(tag, score)| KvOp::SortedAdd {
                            key: key.clone(),
                            member: tag.clone(),
                            score: *score,
                        })
                        .collect();
                    ops.push(KvOp::Expire {
                        key: key.clone(),
                        ttl: INTEREST_TTL,
                    });
                    self.pipeline.execute(ops).await?;
                    debug!(user_id, tags = snapshot.interests.len(), "interest set restored");
                    Ok(())
                },
            )
            .await
    }

    /// Top entries of the live set; `None` once the set has expired.
    pub async fn snapshot(&self, user_id: u64) -> DomainResult<Option<InterestSnapshot>> {
        let key = interest_key(user_id);
        if !self.sorted.exists(&key).await? {
            return Ok(None);
        }
        let interests = self
            .sorted
            .range_desc(&key, INTEREST_CAP)
            .await?
            .into_iter()
            .collect();
        Ok(Some(InterestSnapshot {
            user_id,
            interests,
            updated_at_ms: now_ms(),
        }))
    }

    pub async fn persist(&self, snapshot: &InterestSnapshot) -> DomainResult<()> {
        self.repository.save(snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_learn_from_the_first_two_tags() {
        assert_eq!(InterestAction::View.tag_limit(), 2);
        assert_eq!(InterestAction::Like.tag_limit(), usize::MAX);
        assert_eq!(interest_key(7), "user:interest:7");
    }
}
