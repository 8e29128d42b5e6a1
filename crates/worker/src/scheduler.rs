use std::time::{Duration, Instant};

use cornerstone_domain::reconcile::{JobKind, ReconcileJobs};
use cornerstone_domain::util::today;
use time::{OffsetDateTime, Time};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::observability::register_job_run;

async fn run_once(jobs: &ReconcileJobs, job: JobKind, cancel: &CancellationToken) {
    let started = Instant::now();
    match jobs.run(job, today(), cancel).await {
        Ok(report) => {
            register_job_run(job.as_str(), "ok", report.drained, started.elapsed());
            if report.drained > 0 {
                info!(
                    job = job.as_str(),
                    drained = report.drained,
                    written = report.written,
                    "reconcile job finished"
                );
            }
        }
        Err(err) if err.is_cancelled() => {
            debug!(job = job.as_str(), "reconcile job interrupted by shutdown");
        }
        Err(err) => {
            register_job_run(job.as_str(), "error", 0, started.elapsed());
            warn!(job = job.as_str(), error = %err, "reconcile job failed");
        }
    }
}

/// Runs `job` every `period` until cancelled. The first run happens one
/// period after start.
pub async fn run_every(
    jobs: ReconcileJobs,
    job: JobKind,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    info!(job = job.as_str(), period_secs = period.as_secs(), "job scheduled");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => run_once(&jobs, job, &cancel).await,
        }
    }
}

/// Time left until the next `hour:minute` UTC, never zero.
pub fn until_next_run(now: OffsetDateTime, hour: u8, minute: u8) -> Duration {
    let at = Time::from_hms(hour, minute, 0).unwrap_or(Time::MIDNIGHT);
    let mut next = now.replace_time(at);
    if next <= now {
        next += time::Duration::days(1);
    }
    let wait = next - now;
    Duration::from_millis(wait.whole_milliseconds().max(1) as u64)
}

pub async fn run_daily(
    jobs: ReconcileJobs,
    job: JobKind,
    (hour, minute): (u8, u8),
    cancel: CancellationToken,
) {
    info!(job = job.as_str(), hour, minute, "daily job scheduled");
    loop {
        let wait = until_next_run(OffsetDateTime::now_utc(), hour, minute);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(wait) => run_once(&jobs, job, &cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn daily_run_later_today() {
        let now = datetime!(2025-01-01 23:50:00 UTC);
        assert_eq!(until_next_run(now, 23, 55), Duration::from_secs(300));
    }

    #[test]
    fn daily_run_rolls_over_to_tomorrow() {
        let now = datetime!(2025-01-01 23:55:00 UTC);
        assert_eq!(until_next_run(now, 23, 55), Duration::from_secs(86_400));
        let after = datetime!(2025-01-02 00:10:00 UTC);
        assert_eq!(
            until_next_run(after, 0, 5),
            Duration::from_secs(86_400 - 300)
        );
    }
}
