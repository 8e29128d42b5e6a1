use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use time::Date;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::DomainResult;
use crate::counters::{CountKind, CounterService, DirtyScope};
use crate::error::DomainError;
use crate::interests::InterestRecorder;
use crate::locks::{LockManager, user_metric_lock_key};
use crate::metrics::{DailySnapshot, MetricSeries, MetricTotals, TrendService};
use crate::ports::store::{CountRepository, MetricRepository};

pub const USER_METRIC_LOCK_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    PostMetrics,
    UserMetrics,
    CommentLikes,
    Interests,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::PostMetrics => "post_metrics",
            JobKind::UserMetrics => "user_metrics",
            JobKind::CommentLikes => "comment_likes",
            JobKind::Interests => "interests",
        }
    }

    pub fn scope(self) -> DirtyScope {
        match self {
            JobKind::PostMetrics => DirtyScope::Post,
            JobKind::UserMetrics => DirtyScope::Follow,
            JobKind::CommentLikes => DirtyScope::CommentLike,
            JobKind::Interests => DirtyScope::Interest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub job: JobKind,
    pub drained: usize,
    pub written: usize,
}

fn ensure_live(cancel: &CancellationToken) -> DomainResult<()> {
    if cancel.is_cancelled() {
        return Err(DomainError::Cancelled);
    }
    Ok(())
}

/// Flushes dirty entities into relational rows and daily snapshots. A run that
/// fails leaves its processing set in place for the next run to merge.
#[derive(Clone)]
pub struct ReconcileJobs {
    counters: CounterService,
    truth: Arc<dyn CountRepository>,
    metrics: Arc<dyn MetricRepository>,
    trends: TrendService,
    interests: InterestRecorder,
    locks: LockManager,
}

impl ReconcileJobs {
    pub fn new(
        counters: CounterService,
        truth: Arc<dyn CountRepository>,
        metrics: Arc<dyn MetricRepository>,
        trends: TrendService,
        interests: InterestRecorder,
        locks: LockManager,
    ) -> Self {
        Self {
            counters,
            truth,
            metrics,
            trends,
            interests,
            locks,
        }
    }

    pub async fn run(
        &self,
        job: JobKind,
        today: Date,
        cancel: &CancellationToken,
    ) -> DomainResult<JobReport> {
        let ids = self.counters.drain(job.scope()).await?;
        let written = match job {
            JobKind::PostMetrics => self.flush_posts(&ids, today, cancel).await?,
            JobKind::UserMetrics => self.flush_follows(&ids, today, cancel).await?,
            JobKind::CommentLikes => self.flush_comment_likes(&ids, cancel).await?,
            JobKind::Interests => self.flush_interests(&ids, cancel).await?,
        };
        self.counters.complete_drain(job.scope()).await?;
        if ids.is_empty() {
            debug!(job = job.as_str(), "nothing to reconcile");
        } else {
            info!(job = job.as_str(), drained = ids.len(), written, "reconciliation finished");
        }
        Ok(JobReport {
            job,
            drained: ids.len(),
            written,
        })
    }

    async fn flush_posts(
        &self,
        ids: &[u64],
        today: Date,
        cancel: &CancellationToken,
    ) -> DomainResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        for &post_id in ids {
            ensure_live(cancel)?;
            let totals = MetricTotals {
                likes: self.counters.reconcile(CountKind::PostLike, post_id).await?,
                collects: self.counters.reconcile(CountKind::PostCollect, post_id).await?,
                comments: self.counters.reconcile(CountKind::PostComment, post_id).await?,
                views: self.counters.reconcile(CountKind::PostView, post_id).await?,
                followers: 0,
            };
            self.truth.update_post_counts(post_id, &totals).await?;
            self.metrics
                .upsert_snapshot(
                    MetricSeries::Post,
                    &DailySnapshot {
                        owner_id: post_id,
                        date: today,
                        totals,
                    },
                )
                .await?;
            self.trends.invalidate(MetricSeries::Post, post_id).await?;
        }

        let authors: BTreeSet<u64> = self
            .truth
            .post_authors(ids)
            .await?
            .into_iter()
            .map(|(_, author_id)| author_id)
            .filter(|author_id| *author_id > 0)
            .collect();
        for &author_id in &authors {
            ensure_live(cancel)?;
            self.locks
                .with_lock(
                    &user_metric_lock_key(author_id),
                    USER_METRIC_LOCK_TTL,
                    cancel,
                    || async {
                        let totals = self.truth.author_totals(author_id).await?;
                        self.metrics
                            .upsert_snapshot(
                                MetricSeries::UserContent,
                                &DailySnapshot {
                                    owner_id: author_id,
                                    date: today,
                                    totals,
                                },
                            )
                            .await
                    },
                )
                .await?;
            self.trends
                .invalidate(MetricSeries::UserContent, author_id)
                .await?;
        }
        Ok(ids.len() + authors.len())
    }

    async fn flush_follows(
        &self,
        ids: &[u64],
        today: Date,
        cancel: &CancellationToken,
    ) -> DomainResult<usize> {
        for &user_id in ids {
            ensure_live(cancel)?;
            let followers = self
                .counters
                .reconcile(CountKind::UserFollower, user_id)
                .await?;
            let following = self
                .counters
                .reconcile(CountKind::UserFollowing, user_id)
                .await?;
            self.locks
                .with_lock(
                    &user_metric_lock_key(user_id),
                    USER_METRIC_LOCK_TTL,
                    cancel,
                    || async {
                        self.metrics
                            .upsert_snapshot(
                                MetricSeries::Followers,
                                &DailySnapshot {
                                    owner_id: user_id,
                                    date: today,
                                    totals: MetricTotals {
                                        followers,
                                        ..MetricTotals::default()
                                    },
                                },
                            )
                            .await
                    },
                )
                .await?;
            self.truth
                .update_follow_counts(user_id, followers, following)
                .await?;
            self.trends
                .invalidate(MetricSeries::Followers, user_id)
                .await?;
        }
        Ok(ids.len())
    }

    async fn flush_comment_likes(
        &self,
        ids: &[u64],
        cancel: &CancellationToken,
    ) -> DomainResult<usize> {
        for &comment_id in ids {
            ensure_live(cancel)?;
            let likes = self
                .counters
                .reconcile(CountKind::CommentLike, comment_id)
                .await?;
            self.truth.update_comment_likes(comment_id, likes).await?;
        }
        Ok(ids.len())
    }

    async fn flush_interests(
        &self,
        ids: &[u64],
        cancel: &CancellationToken,
    ) -> DomainResult<usize> {
        let mut written = 0;
        for &user_id in ids {
            ensure_live(cancel)?;
            match self.interests.snapshot(user_id).await? {
                Some(snapshot) => {
                    self.interests.persist(&snapshot).await?;
                    written += 1;
                }
                None => debug!(user_id, "interest set expired before snapshot"),
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_job_drains_its_own_scope() {
        assert_eq!(JobKind::PostMetrics.scope(), DirtyScope::Post);
        assert_eq!(JobKind::UserMetrics.scope(), DirtyScope::Follow);
        assert_eq!(JobKind::CommentLikes.scope(), DirtyScope::CommentLike);
        assert_eq!(JobKind::Interests.scope().key(), "dirty:interest");
    }
}
