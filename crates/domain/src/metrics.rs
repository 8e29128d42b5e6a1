use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Date, Duration as DateSpan, OffsetDateTime};
use tracing::warn;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::kv::CacheStore;
use crate::ports::store::{ContentRepository, MetricRepository};
use crate::util::{format_date, ttl_until_midnight};

pub const TREND_WINDOWS: [u32; 2] = [7, 30];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSeries {
    Post,
    UserContent,
    Followers,
}

impl MetricSeries {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricSeries::Post => "post",
            MetricSeries::UserContent => "user_content",
            MetricSeries::Followers => "followers",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MetricTotals {
    pub likes: i64,
    pub collects: i64,
    pub comments: i64,
    pub views: i64,
    pub followers: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySnapshot {
    pub owner_id: u64,
    pub date: Date,
    pub totals: MetricTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: String,
    #[serde(flatten)]
    pub totals: MetricTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub series: MetricSeries,
    pub owner_id: u64,
    pub days: u32,
    pub points: Vec<TrendPoint>,
}

pub fn window_start(end: Date, days: u32) -> Date {
    end - DateSpan::days(i64::from(days.max(1)) - 1)
}

/// One point per day of `[end - (days - 1), end]`. Days without a snapshot
/// repeat the previous day's totals, starting from `baseline` (or zero).
pub fn smooth(
    end: Date,
    days: u32,
    snapshots: &[DailySnapshot],
    baseline: Option<&DailySnapshot>,
) -> Vec<TrendPoint> {
    let days = days.max(1);
    let start = window_start(end, days);
    let by_date: HashMap<Date, MetricTotals> = snapshots
        .iter()
        .filter(|snapshot| snapshot.date >= start && snapshot.date <= end)
        .map(|snapshot| (snapshot.date, snapshot.totals))
        .collect();
    let mut carry = baseline.map(|snapshot| snapshot.totals).unwrap_or_default();
    let mut points = Vec::with_capacity(days as usize);
    let mut date = start;
    for _ in 0..days {
        if let Some(totals) = by_date.get(&date) {
            carry = *totals;
        }
        points.push(TrendPoint {
            date: format_date(date),
            totals: carry,
        });
        date = match date.next_day() {
            Some(next) => next,
            None => break,
        };
    }
    points
}

pub fn trend_cache_key(series: MetricSeries, days: u32, owner_id: u64) -> String {
    format!("trend:{}:{days}:{owner_id}", series.as_str())
}

#[derive(Clone)]
pub struct TrendService {
    metrics: Arc<dyn MetricRepository>,
    cache: Arc<dyn CacheStore>,
    content: Arc<dyn ContentRepository>,
}

impl TrendService {
    pub fn new(
        metrics: Arc<dyn MetricRepository>,
        cache: Arc<dyn CacheStore>,
        content: Arc<dyn ContentRepository>,
    ) -> Self {
        Self {
            metrics,
            cache,
            content,
        }
    }

    pub async fn trend(
        &self,
        series: MetricSeries,
        owner_id: u64,
        days: u32,
    ) -> DomainResult<TrendSeries> {
        self.trend_at(series, owner_id, days, OffsetDateTime::now_utc())
            .await
    }

    pub async fn trend_at(
        &self,
        series: MetricSeries,
        owner_id: u64,
        days: u32,
        now: OffsetDateTime,
    ) -> DomainResult<TrendSeries> {
        if !TREND_WINDOWS.contains(&days) {
            return Err(DomainError::Validation(format!(
                "trend window must be one of {TREND_WINDOWS:?}"
            )));
        }
        let key = trend_cache_key(series, days, owner_id);
        if let Some(cached) = self.cache.get(&key).await? {
            match serde_json::from_str::<TrendSeries>(&cached) {
                Ok(trend) => return Ok(trend),
                Err(err) => warn!(key = %key, error = %err, "discarding unreadable trend cache"),
            }
        }

        let end = now.date();
        let start = window_start(end, days);
        let snapshots = self
            .metrics
            .list_snapshots(series, owner_id, start, end)
            .await?;
        let baseline = if snapshots.first().is_some_and(|first| first.date == start) {
            None
        } else {
            self.metrics.latest_before(series, owner_id, start).await?
        };
        let trend = TrendSeries {
            series,
            owner_id,
            days,
            points: smooth(end, days, &snapshots, baseline.as_ref()),
        };
        let encoded = serde_json::to_string(&trend)
            .map_err(|err| DomainError::Validation(format!("invalid trend payload: {err}")))?;
        self.cache
            .put(&key, &encoded, ttl_until_midnight(now))
            .await?;
        Ok(trend)
    }

    /// Post trends are visible to the post's author only.
    pub async fn post_trend(
        &self,
        post_id: u64,
        requester_id: u64,
        days: u32,
    ) -> DomainResult<TrendSeries> {
        let post = self
            .content
            .get_post(post_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if post.author_id != requester_id {
            return Err(DomainError::Unauthorized(
                "post metrics belong to another user".to_string(),
            ));
        }
        self.trend(MetricSeries::Post, post_id, days).await
    }

    pub async fn invalidate(&self, series: MetricSeries, owner_id: u64) -> DomainResult<()> {
        let keys: Vec<String> = TREND_WINDOWS
            .iter()
            .map(|days| trend_cache_key(series, *days, owner_id))
            .collect();
        self.cache.delete(&keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn snapshot(date: Date, likes: i64) -> DailySnapshot {
        DailySnapshot {
            owner_id: 1,
            date,
            totals: MetricTotals {
                likes,
                ..MetricTotals::default()
            },
        }
    }

    #[test]
    fn empty_history_is_all_zero() {
        let points = smooth(date!(2026 - 03 - 10), 7, &[], None);
        assert_eq!(points.len(), 7);
        assert_eq!(points[0].date, "2026-03-04");
        assert_eq!(points[6].date, "2026-03-10");
        assert!(points.iter().all(|point| point.totals == MetricTotals::default()));
    }

    #[test]
    fn gaps_carry_the_previous_day_forward() {
        let end = date!(2026 - 03 - 10);
        let points = smooth(
            end,
            7,
            &[snapshot(date!(2026 - 03 - 05), 4), snapshot(date!(2026 - 03 - 08), 9)],
            Some(&snapshot(date!(2026 - 02 - 20), 1)),
        );
        let likes: Vec<i64> = points.iter().map(|point| point.totals.likes).collect();
        assert_eq!(likes, vec![1, 4, 4, 4, 9, 9, 9]);
    }

    #[test]
    fn cache_key_names_series_window_and_owner() {
        assert_eq!(trend_cache_key(MetricSeries::Post, 7, 42), "trend:post:7:42");
    }
}
