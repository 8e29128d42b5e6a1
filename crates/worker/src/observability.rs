use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use cornerstone_domain::batch::{FlushObserver, FlushReport};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

const MESSAGES_TOTAL: &str = "cornerstone_worker_messages_total";
const BATCH_FLUSH_DURATION_MS: &str = "cornerstone_worker_batch_flush_duration_ms";
const COMMITTED_OFFSET_GAUGE: &str = "cornerstone_worker_committed_offset";
const JOB_RUNS_TOTAL: &str = "cornerstone_worker_job_runs_total";
const JOB_DURATION_MS: &str = "cornerstone_worker_job_duration_ms";
const JOB_DRAINED_ENTITIES: &str = "cornerstone_worker_job_drained_entities";

/// Installs the recorder and serves `/metrics` on `port`. Must run inside the
/// tokio runtime.
pub fn init_metrics(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()?;
    tracing::info!(port, "metrics exporter listening");
    Ok(())
}

pub struct MetricsObserver;

impl FlushObserver for MetricsObserver {
    fn flushed(&self, report: &FlushReport) {
        let succeeded = report.messages.saturating_sub(report.failed);
        counter!(
            MESSAGES_TOTAL,
            "topic" => report.topic.clone(),
            "result" => "ok"
        )
        .increment(succeeded as u64);
        if report.failed > 0 {
            counter!(
                MESSAGES_TOTAL,
                "topic" => report.topic.clone(),
                "result" => "failed"
            )
            .increment(report.failed as u64);
        }

        histogram!(
            BATCH_FLUSH_DURATION_MS,
            "topic" => report.topic.clone()
        )
        .record(report.elapsed.as_secs_f64() * 1000.0);

        for checkpoint in &report.committed {
            gauge!(
                COMMITTED_OFFSET_GAUGE,
                "topic" => report.topic.clone(),
                "partition" => checkpoint.partition.to_string()
            )
            .set(checkpoint.offset as f64);
        }
    }
}

pub fn register_job_run(job: &str, result: &str, drained: usize, elapsed: Duration) {
    counter!(
        JOB_RUNS_TOTAL,
        "job" => job.to_string(),
        "result" => result.to_string()
    )
    .increment(1);

    histogram!(
        JOB_DURATION_MS,
        "job" => job.to_string()
    )
    .record(elapsed.as_secs_f64() * 1000.0);

    gauge!(JOB_DRAINED_ENTITIES, "job" => job.to_string()).set(drained as f64);
}
