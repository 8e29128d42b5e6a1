use time::Date;

use super::BoxFuture;
use crate::DomainResult;
use crate::content::{Comment, ContentStatus, MediaItem, Post, PostTags, UserProfile};
use crate::counters::CountKind;
use crate::follows::FollowDirection;
use crate::interests::InterestSnapshot;
use crate::metrics::{DailySnapshot, MetricSeries, MetricTotals};

/// Read models plus the two status-gate writes.
pub trait ContentRepository: Send + Sync {
    fn get_post(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Option<Post>>>;
    fn get_comment(&self, comment_id: u64) -> BoxFuture<'_, DomainResult<Option<Comment>>>;
    fn get_user_profile(&self, user_id: u64) -> BoxFuture<'_, DomainResult<Option<UserProfile>>>;
    fn post_media(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Vec<MediaItem>>>;
    fn post_tags(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Option<PostTags>>>;
    fn save_post_tags(&self, tags: &PostTags) -> BoxFuture<'_, DomainResult<()>>;
    fn update_post_status(
        &self,
        post_id: u64,
        status: ContentStatus,
    ) -> BoxFuture<'_, DomainResult<()>>;
    fn update_comment_status(
        &self,
        comment_id: u64,
        status: ContentStatus,
    ) -> BoxFuture<'_, DomainResult<()>>;
}

/// Relational truth for aggregates and the denormalised count columns.
pub trait CountRepository: Send + Sync {
    fn count(&self, kind: CountKind, entity_id: u64) -> BoxFuture<'_, DomainResult<i64>>;
    fn update_post_counts(
        &self,
        post_id: u64,
        totals: &MetricTotals,
    ) -> BoxFuture<'_, DomainResult<()>>;
    fn update_comment_likes(&self, comment_id: u64, likes: i64)
    -> BoxFuture<'_, DomainResult<()>>;
    fn update_follow_counts(
        &self,
        user_id: u64,
        followers: i64,
        following: i64,
    ) -> BoxFuture<'_, DomainResult<()>>;
    /// Post authors of the given posts, deduplicated.
    fn post_authors(&self, post_ids: &[u64]) -> BoxFuture<'_, DomainResult<Vec<(u64, u64)>>>;
    /// Sums over the author's non-deleted posts.
    fn author_totals(&self, user_id: u64) -> BoxFuture<'_, DomainResult<MetricTotals>>;
    /// Newest edges first, `(counterpart, created_at unix seconds)`.
    fn recent_edges(
        &self,
        user_id: u64,
        direction: FollowDirection,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<(u64, i64)>>>;
}

pub trait MetricRepository: Send + Sync {
    /// Inserts or overwrites the totals of the `(owner, date)` row.
    fn upsert_snapshot(
        &self,
        series: MetricSeries,
        snapshot: &DailySnapshot,
    ) -> BoxFuture<'_, DomainResult<()>>;
    /// Rows with `from <= date <= to`, ascending by date.
    fn list_snapshots(
        &self,
        series: MetricSeries,
        owner_id: u64,
        from: Date,
        to: Date,
    ) -> BoxFuture<'_, DomainResult<Vec<DailySnapshot>>>;
    fn latest_before(
        &self,
        series: MetricSeries,
        owner_id: u64,
        before: Date,
    ) -> BoxFuture<'_, DomainResult<Option<DailySnapshot>>>;
}

pub trait InterestRepository: Send + Sync {
    fn get(&self, user_id: u64) -> BoxFuture<'_, DomainResult<Option<InterestSnapshot>>>;
    fn save(&self, snapshot: &InterestSnapshot) -> BoxFuture<'_, DomainResult<()>>;
}
