use std::collections::{BTreeMap, HashSet};

use cornerstone_domain::DomainResult;
use cornerstone_domain::content::{Comment, ContentStatus, MediaItem, Post, PostTags, UserProfile};
use cornerstone_domain::counters::CountKind;
use cornerstone_domain::error::DomainError;
use cornerstone_domain::follows::FollowDirection;
use cornerstone_domain::interests::InterestSnapshot;
use cornerstone_domain::metrics::{DailySnapshot, MetricSeries, MetricTotals};
use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::store::{
    ContentRepository, CountRepository, InterestRepository, MetricRepository,
};
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, QueryBuilder, Row};
use time::{Date, OffsetDateTime, PrimitiveDateTime};

const POST_COLUMNS: &str = "id, user_id, title, content, CAST(status AS SIGNED) AS status, \
     CAST(is_deleted AS SIGNED) AS is_deleted, content_version, likes_count, comments_count, \
     collects_count, views_count, created_at, updated_at";

const COMMENT_COLUMNS: &str = "id, post_id, user_id, root_id, parent_id, reply_to_user_id, \
     content, media_info, CAST(status AS SIGNED) AS status, \
     CAST(is_deleted AS SIGNED) AS is_deleted, created_at";

const POST_MEDIA_SQL: &str = "SELECT media_url, file_type, width, height, duration, cover_url \
     FROM post_media WHERE post_id = ? ORDER BY sort_order ASC, id ASC";

fn map_sqlx_error(err: sqlx::Error) -> DomainError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => DomainError::AlreadyActed,
        sqlx::Error::RowNotFound => DomainError::NotFound,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            DomainError::Validation(format!("mysql row mismatch: {err}"))
        }
        _ => DomainError::Unavailable(format!("mysql: {err}")),
    }
}

fn unix_seconds(row: &MySqlRow, column: &str) -> DomainResult<i64> {
    let value: Option<PrimitiveDateTime> = row.try_get(column).map_err(map_sqlx_error)?;
    Ok(value
        .map(|value| value.assume_utc().unix_timestamp())
        .unwrap_or_default())
}

fn unix_millis(row: &MySqlRow, column: &str) -> DomainResult<i64> {
    let value: Option<PrimitiveDateTime> = row.try_get(column).map_err(map_sqlx_error)?;
    Ok(value
        .map(|value| (value.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64)
        .unwrap_or_default())
}

fn datetime_from_millis(millis: i64) -> DomainResult<PrimitiveDateTime> {
    let utc = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|err| DomainError::Validation(format!("timestamp out of range: {err}")))?;
    Ok(PrimitiveDateTime::new(utc.date(), utc.time()))
}

fn decode_post(row: &MySqlRow) -> DomainResult<Post> {
    let status: i64 = row.try_get("status").map_err(map_sqlx_error)?;
    let is_deleted: i64 = row.try_get("is_deleted").map_err(map_sqlx_error)?;
    Ok(Post {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        author_id: row.try_get("user_id").map_err(map_sqlx_error)?,
        title: row.try_get("title").map_err(map_sqlx_error)?,
        content: row.try_get("content").map_err(map_sqlx_error)?,
        status: ContentStatus::from_code(status as i32),
        is_deleted: is_deleted != 0,
        content_version: row.try_get("content_version").map_err(map_sqlx_error)?,
        likes_count: row.try_get("likes_count").map_err(map_sqlx_error)?,
        comments_count: row.try_get("comments_count").map_err(map_sqlx_error)?,
        collects_count: row.try_get("collects_count").map_err(map_sqlx_error)?,
        views_count: row.try_get("views_count").map_err(map_sqlx_error)?,
        created_at: unix_seconds(row, "created_at")?,
        updated_at: unix_seconds(row, "updated_at")?,
    })
}

fn decode_comment(row: &MySqlRow) -> DomainResult<Comment> {
    let status: i64 = row.try_get("status").map_err(map_sqlx_error)?;
    let is_deleted: i64 = row.try_get("is_deleted").map_err(map_sqlx_error)?;
    let media_info: Option<String> = row.try_get("media_info").map_err(map_sqlx_error)?;
    Ok(Comment {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        post_id: row.try_get("post_id").map_err(map_sqlx_error)?,
        user_id: row.try_get("user_id").map_err(map_sqlx_error)?,
        root_id: row.try_get("root_id").map_err(map_sqlx_error)?,
        parent_id: row.try_get("parent_id").map_err(map_sqlx_error)?,
        reply_to_user: row.try_get("reply_to_user_id").map_err(map_sqlx_error)?,
        content: row.try_get("content").map_err(map_sqlx_error)?,
        media: parse_media_info(media_info.as_deref()),
        status: ContentStatus::from_code(status as i32),
        is_deleted: is_deleted != 0,
        created_at: unix_seconds(row, "created_at")?,
    })
}

/// Malformed media JSON degrades to no media.
fn parse_media_info(raw: Option<&str>) -> Vec<MediaItem> {
    raw.filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

fn count_sql(kind: CountKind) -> &'static str {
    match kind {
        CountKind::PostLike => "SELECT COUNT(*) FROM likes WHERE post_id = ?",
        CountKind::PostCollect => "SELECT COUNT(*) FROM collections WHERE post_id = ?",
        CountKind::PostComment => {
            "SELECT COUNT(*) FROM post_comments WHERE post_id = ? AND is_deleted = 0 AND status = 1"
        }
        CountKind::PostView => "SELECT COUNT(*) FROM post_views WHERE post_id = ?",
        CountKind::CommentLike => "SELECT COUNT(*) FROM comment_likes WHERE comment_id = ?",
        CountKind::UserFollower => "SELECT COUNT(*) FROM user_follows WHERE following_id = ?",
        CountKind::UserFollowing => "SELECT COUNT(*) FROM user_follows WHERE follower_id = ?",
    }
}

fn edges_sql(direction: FollowDirection) -> &'static str {
    match direction {
        FollowDirection::Followers => {
            "SELECT follower_id AS counterpart, created_at FROM user_follows \
             WHERE following_id = ? ORDER BY created_at DESC, follower_id DESC LIMIT ?"
        }
        FollowDirection::Following => {
            "SELECT following_id AS counterpart, created_at FROM user_follows \
             WHERE follower_id = ? ORDER BY created_at DESC, following_id DESC LIMIT ?"
        }
    }
}

/// `(table, owner column)` of each metric series.
fn metric_table(series: MetricSeries) -> (&'static str, &'static str) {
    match series {
        MetricSeries::Post => ("post_daily_metrics", "post_id"),
        MetricSeries::UserContent => ("user_content_metrics", "user_id"),
        MetricSeries::Followers => ("user_metrics", "user_id"),
    }
}

fn metric_columns(series: MetricSeries) -> &'static [&'static str] {
    match series {
        MetricSeries::Post | MetricSeries::UserContent => &[
            "likes_count",
            "collects_count",
            "comments_count",
            "views_count",
        ],
        MetricSeries::Followers => &["followers_count"],
    }
}

fn upsert_sql(series: MetricSeries) -> String {
    let (table, owner) = metric_table(series);
    let columns = metric_columns(series);
    let placeholders = vec!["?"; columns.len() + 2].join(", ");
    let updates = columns
        .iter()
        .map(|column| format!("{column} = VALUES({column})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({owner}, metric_date, {}) VALUES ({placeholders}) \
         ON DUPLICATE KEY UPDATE {updates}",
        columns.join(", ")
    )
}

fn select_metric_sql(series: MetricSeries, tail: &str) -> String {
    let (table, owner) = metric_table(series);
    format!(
        "SELECT metric_date, {} FROM {table} WHERE {owner} = ? {tail}",
        metric_columns(series).join(", ")
    )
}

fn decode_snapshot(
    series: MetricSeries,
    owner_id: u64,
    row: &MySqlRow,
) -> DomainResult<DailySnapshot> {
    let date: Date = row.try_get("metric_date").map_err(map_sqlx_error)?;
    let totals = match series {
        MetricSeries::Post | MetricSeries::UserContent => MetricTotals {
            likes: row.try_get("likes_count").map_err(map_sqlx_error)?,
            collects: row.try_get("collects_count").map_err(map_sqlx_error)?,
            comments: row.try_get("comments_count").map_err(map_sqlx_error)?,
            views: row.try_get("views_count").map_err(map_sqlx_error)?,
            ..MetricTotals::default()
        },
        MetricSeries::Followers => MetricTotals {
            followers: row.try_get("followers_count").map_err(map_sqlx_error)?,
            ..MetricTotals::default()
        },
    };
    Ok(DailySnapshot {
        owner_id,
        date,
        totals,
    })
}

/// Relational side of the pipeline: read models, truth counts, snapshots.
#[derive(Clone)]
pub struct MysqlStore {
    pool: MySqlPool,
}

impl MysqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

impl ContentRepository for MysqlStore {
    fn get_post(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Option<Post>>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?"))
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            row.as_ref().map(decode_post).transpose()
        })
    }

    fn get_comment(&self, comment_id: u64) -> BoxFuture<'_, DomainResult<Option<Comment>>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {COMMENT_COLUMNS} FROM post_comments WHERE id = ?"
            ))
            .bind(comment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            row.as_ref().map(decode_comment).transpose()
        })
    }

    fn get_user_profile(&self, user_id: u64) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT user_id, nickname, avatar_url, bio, followers_count, following_count \
                 FROM user_detail WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            let Some(row) = row else {
                return Ok(None);
            };
            Ok(Some(UserProfile {
                user_id: row.try_get("user_id").map_err(map_sqlx_error)?,
                nickname: row.try_get("nickname").map_err(map_sqlx_error)?,
                avatar_url: row
                    .try_get::<Option<String>, _>("avatar_url")
                    .map_err(map_sqlx_error)?
                    .unwrap_or_default(),
                bio: row
                    .try_get::<Option<String>, _>("bio")
                    .map_err(map_sqlx_error)?
                    .unwrap_or_default(),
                followers_count: row.try_get("followers_count").map_err(map_sqlx_error)?,
                following_count: row.try_get("following_count").map_err(map_sqlx_error)?,
            }))
        })
    }

    fn post_media(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Vec<MediaItem>>> {
        Box::pin(async move {
            let rows = sqlx::query(POST_MEDIA_SQL)
                .bind(post_id)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            rows.iter()
                .map(|row| {
                    let duration: i32 = row.try_get("duration").map_err(map_sqlx_error)?;
                    Ok(MediaItem {
                        mime_type: row.try_get("file_type").map_err(map_sqlx_error)?,
                        url: row.try_get("media_url").map_err(map_sqlx_error)?,
                        width: row.try_get("width").map_err(map_sqlx_error)?,
                        height: row.try_get("height").map_err(map_sqlx_error)?,
                        duration: f64::from(duration),
                        cover_url: row.try_get("cover_url").map_err(map_sqlx_error)?,
                    })
                })
                .collect()
        })
    }

    fn post_tags(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Option<PostTags>>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT main_tag, ai_tags FROM post_tags WHERE post_id = ?")
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            let Some(row) = row else {
                return Ok(None);
            };
            let ai_tags: Option<String> = row.try_get("ai_tags").map_err(map_sqlx_error)?;
            Ok(Some(PostTags {
                post_id,
                main_tag: row.try_get("main_tag").map_err(map_sqlx_error)?,
                ai_tags: ai_tags
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or_default(),
            }))
        })
    }

    fn save_post_tags(&self, tags: &PostTags) -> BoxFuture<'_, DomainResult<()>> {
        let tags = tags.clone();
        Box::pin(async move {
            let ai_tags = serde_json::to_string(&tags.ai_tags)
                .map_err(|err| DomainError::Validation(format!("invalid tags: {err}")))?;
            sqlx::query(
                "INSERT INTO post_tags (post_id, main_tag, ai_tags) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE main_tag = VALUES(main_tag), ai_tags = VALUES(ai_tags)",
            )
            .bind(tags.post_id)
            .bind(tags.main_tag.as_deref())
            .bind(ai_tags)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            Ok(())
        })
    }

    fn update_post_status(
        &self,
        post_id: u64,
        status: ContentStatus,
    ) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE posts SET status = ? WHERE id = ?")
                .bind(status.code())
                .bind(post_id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if result.rows_affected() == 0 && self.get_post(post_id).await?.is_none() {
                return Err(DomainError::NotFound);
            }
            Ok(())
        })
    }

    fn update_comment_status(
        &self,
        comment_id: u64,
        status: ContentStatus,
    ) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE post_comments SET status = ? WHERE id = ?")
                .bind(status.code())
                .bind(comment_id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if result.rows_affected() == 0 && self.get_comment(comment_id).await?.is_none() {
                return Err(DomainError::NotFound);
            }
            Ok(())
        })
    }
}

impl CountRepository for MysqlStore {
    fn count(&self, kind: CountKind, entity_id: u64) -> BoxFuture<'_, DomainResult<i64>> {
        Box::pin(async move {
            let count: i64 = sqlx::query_scalar(count_sql(kind))
                .bind(entity_id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(count)
        })
    }

    fn update_post_counts(
        &self,
        post_id: u64,
        totals: &MetricTotals,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let totals = *totals;
        Box::pin(async move {
            sqlx::query(
                "UPDATE posts SET likes_count = ?, collects_count = ?, comments_count = ?, \
                 views_count = ? WHERE id = ?",
            )
            .bind(totals.likes)
            .bind(totals.collects)
            .bind(totals.comments)
            .bind(totals.views)
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            Ok(())
        })
    }

    fn update_comment_likes(
        &self,
        comment_id: u64,
        likes: i64,
    ) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async move {
            sqlx::query("UPDATE post_comments SET likes_count = ? WHERE id = ?")
                .bind(likes)
                .bind(comment_id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(())
        })
    }

    fn update_follow_counts(
        &self,
        user_id: u64,
        followers: i64,
        following: i64,
    ) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async move {
            sqlx::query(
                "UPDATE user_detail SET followers_count = ?, following_count = ? WHERE user_id = ?",
            )
            .bind(followers)
            .bind(following)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            Ok(())
        })
    }

    fn post_authors(&self, post_ids: &[u64]) -> BoxFuture<'_, DomainResult<Vec<(u64, u64)>>> {
        let post_ids: Vec<u64> = post_ids
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        Box::pin(async move {
            if post_ids.is_empty() {
                return Ok(Vec::new());
            }
            let mut builder: QueryBuilder<MySql> =
                QueryBuilder::new("SELECT id, user_id FROM posts WHERE id IN (");
            let mut separated = builder.separated(", ");
            for post_id in &post_ids {
                separated.push_bind(*post_id);
            }
            separated.push_unseparated(")");
            let rows = builder
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            rows.iter()
                .map(|row| {
                    Ok((
                        row.try_get("id").map_err(map_sqlx_error)?,
                        row.try_get("user_id").map_err(map_sqlx_error)?,
                    ))
                })
                .collect()
        })
    }

    fn author_totals(&self, user_id: u64) -> BoxFuture<'_, DomainResult<MetricTotals>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT CAST(COALESCE(SUM(likes_count), 0) AS SIGNED) AS likes, \
                 CAST(COALESCE(SUM(collects_count), 0) AS SIGNED) AS collects, \
                 CAST(COALESCE(SUM(comments_count), 0) AS SIGNED) AS comments, \
                 CAST(COALESCE(SUM(views_count), 0) AS SIGNED) AS views \
                 FROM posts WHERE user_id = ? AND is_deleted = 0",
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            Ok(MetricTotals {
                likes: row.try_get("likes").map_err(map_sqlx_error)?,
                collects: row.try_get("collects").map_err(map_sqlx_error)?,
                comments: row.try_get("comments").map_err(map_sqlx_error)?,
                views: row.try_get("views").map_err(map_sqlx_error)?,
                ..MetricTotals::default()
            })
        })
    }

    fn recent_edges(
        &self,
        user_id: u64,
        direction: FollowDirection,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<(u64, i64)>>> {
        Box::pin(async move {
            let rows = sqlx::query(edges_sql(direction))
                .bind(user_id)
                .bind(limit as u64)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            rows.iter()
                .map(|row| {
                    Ok((
                        row.try_get("counterpart").map_err(map_sqlx_error)?,
                        unix_seconds(row, "created_at")?,
                    ))
                })
                .collect()
        })
    }
}

impl MetricRepository for MysqlStore {
    fn upsert_snapshot(
        &self,
        series: MetricSeries,
        snapshot: &DailySnapshot,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let snapshot = *snapshot;
        Box::pin(async move {
            let sql = upsert_sql(series);
            let mut query = sqlx::query(&sql)
                .bind(snapshot.owner_id)
                .bind(snapshot.date);
            let totals = snapshot.totals;
            query = match series {
                MetricSeries::Post | MetricSeries::UserContent => query
                    .bind(totals.likes)
                    .bind(totals.collects)
                    .bind(totals.comments)
                    .bind(totals.views),
                MetricSeries::Followers => query.bind(totals.followers),
            };
            query
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(())
        })
    }

    fn list_snapshots(
        &self,
        series: MetricSeries,
        owner_id: u64,
        from: Date,
        to: Date,
    ) -> BoxFuture<'_, DomainResult<Vec<DailySnapshot>>> {
        Box::pin(async move {
            if from > to {
                return Ok(Vec::new());
            }
            let sql = select_metric_sql(
                series,
                "AND metric_date >= ? AND metric_date <= ? ORDER BY metric_date ASC",
            );
            let rows = sqlx::query(&sql)
                .bind(owner_id)
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            rows.iter()
                .map(|row| decode_snapshot(series, owner_id, row))
                .collect()
        })
    }

    fn latest_before(
        &self,
        series: MetricSeries,
        owner_id: u64,
        before: Date,
    ) -> BoxFuture<'_, DomainResult<Option<DailySnapshot>>> {
        Box::pin(async move {
            let sql = select_metric_sql(
                series,
                "AND metric_date < ? ORDER BY metric_date DESC LIMIT 1",
            );
            let row = sqlx::query(&sql)
                .bind(owner_id)
                .bind(before)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            row.as_ref()
                .map(|row| decode_snapshot(series, owner_id, row))
                .transpose()
        })
    }
}

impl InterestRepository for MysqlStore {
    fn get(&self, user_id: u64) -> BoxFuture<'_, DomainResult<Option<InterestSnapshot>>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT interests, updated_at FROM user_interest_tags WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            let Some(row) = row else {
                return Ok(None);
            };
            let raw: String = row.try_get("interests").map_err(map_sqlx_error)?;
            let interests: BTreeMap<String, i64> = serde_json::from_str(&raw)
                .map_err(|err| DomainError::Validation(format!("invalid interest row: {err}")))?;
            Ok(Some(InterestSnapshot {
                user_id,
                interests,
                updated_at_ms: unix_millis(&row, "updated_at")?,
            }))
        })
    }

    fn save(&self, snapshot: &InterestSnapshot) -> BoxFuture<'_, DomainResult<()>> {
        let snapshot = snapshot.clone();
        Box::pin(async move {
            let interests = serde_json::to_string(&snapshot.interests)
                .map_err(|err| DomainError::Validation(format!("invalid interests: {err}")))?;
            sqlx::query(
                "INSERT INTO user_interest_tags (user_id, interests, updated_at) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE interests = VALUES(interests), \
                 updated_at = VALUES(updated_at)",
            )
            .bind(snapshot.user_id)
            .bind(interests)
            .bind(datetime_from_millis(snapshot.updated_at_ms)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_counts_only_see_published_rows() {
        let sql = count_sql(CountKind::PostComment);
        assert!(sql.contains("is_deleted = 0"));
        assert!(sql.contains("status = 1"));
        assert!(count_sql(CountKind::UserFollower).contains("following_id"));
        assert!(count_sql(CountKind::UserFollowing).contains("follower_id"));
    }

    #[test]
    fn metric_upserts_target_the_series_table() {
        let sql = upsert_sql(MetricSeries::Followers);
        assert_eq!(
            sql,
            "INSERT INTO user_metrics (user_id, metric_date, followers_count) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE followers_count = VALUES(followers_count)"
        );
        let post = upsert_sql(MetricSeries::Post);
        assert!(post.starts_with("INSERT INTO post_daily_metrics (post_id, metric_date,"));
        assert!(post.contains("VALUES (?, ?, ?, ?, ?, ?)"));
    }

    #[test]
    fn edges_are_read_newest_first() {
        let sql = edges_sql(FollowDirection::Followers);
        assert!(sql.contains("WHERE following_id = ?"));
        assert!(sql.contains("ORDER BY created_at DESC"));
    }

    #[test]
    fn post_media_reads_the_gallery_in_display_order() {
        assert!(POST_MEDIA_SQL.contains("FROM post_media WHERE post_id = ?"));
        assert!(POST_MEDIA_SQL.ends_with("ORDER BY sort_order ASC, id ASC"));
        for column in ["media_url", "file_type", "width", "height", "duration", "cover_url"] {
            assert!(POST_MEDIA_SQL.contains(column), "missing {column}");
        }
    }

    #[test]
    fn interest_timestamps_are_stored_as_utc_datetimes() {
        let stored = datetime_from_millis(1_735_689_600_250).unwrap();
        assert_eq!(stored.date(), time::macros::date!(2025 - 01 - 01));
        assert_eq!(stored.time(), time::macros::time!(00:00:00.25));
        assert_eq!(
            (stored.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            1_735_689_600_250
        );
    }

    #[test]
    fn broken_media_json_means_no_media() {
        assert!(parse_media_info(Some("{not json")).is_empty());
        assert!(parse_media_info(None).is_empty());
        let media = parse_media_info(Some(r#"[{"file_type":"image/png","media_url":"a.png"}]"#));
        assert_eq!(media[0].url, "a.png");
    }
}
