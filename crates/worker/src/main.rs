mod observability;
mod scheduler;
mod state;

use std::sync::Arc;
use std::time::Duration;

use cornerstone_domain::batch::Batcher;
use cornerstone_domain::dispatch::Dispatcher;
use cornerstone_domain::handlers::{CdcTable, TableHandler};
use cornerstone_domain::memory::InMemoryLog;
use cornerstone_domain::reconcile::JobKind;
use cornerstone_infra::kafka::KafkaSource;
use cornerstone_infra::{config::AppConfig, logging::init_tracing};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::observability::{MetricsObserver, init_metrics};
use crate::state::WorkerState;

/// Topics may carry a connector prefix such as `cdc.posts`.
fn table_for_topic(topic: &str) -> Option<CdcTable> {
    CdcTable::parse(topic).or_else(|| topic.rsplit('.').next().and_then(CdcTable::parse))
}

async fn consume(
    state: WorkerState,
    config: AppConfig,
    topic: String,
    table: CdcTable,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let handler = Arc::new(TableHandler::new(table, state.services.clone()));
    let dispatcher = Arc::new(Dispatcher::new(table.name(), handler, config.retry_policy()));
    let mut batcher =
        Batcher::new(config.batch_config(), dispatcher).with_observer(Arc::new(MetricsObserver));

    if config.is_memory_backend() {
        let mut source = InMemoryLog::new(topic);
        batcher.run(&mut source, &cancel).await?;
    } else {
        let mut source = KafkaSource::subscribe(&config, &topic)?;
        batcher.run(&mut source, &cancel).await?;
    }
    Ok(())
}

fn spawn_jobs(tasks: &mut JoinSet<()>, state: &WorkerState, config: &AppConfig, cancel: &CancellationToken) {
    let periodic = [
        (JobKind::PostMetrics, config.post_metrics_interval_secs),
        (JobKind::CommentLikes, config.comment_like_interval_secs),
        (JobKind::Interests, config.interest_interval_secs),
    ];
    for (job, secs) in periodic {
        tasks.spawn(scheduler::run_every(
            state.jobs.clone(),
            job,
            Duration::from_secs(secs),
            cancel.clone(),
        ));
    }
    tasks.spawn(scheduler::run_daily(
        state.jobs.clone(),
        JobKind::UserMetrics,
        config.user_metrics_time(),
        cancel.clone(),
    ));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    init_metrics(config.metrics_port)?;

    let state = WorkerState::new(&config).await?;
    state.check_health().await?;
    info!(backend = %config.data_backend, "worker starting");

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    for topic in config.topics() {
        let Some(table) = table_for_topic(&topic) else {
            warn!(topic, "no handler for topic, not consuming");
            continue;
        };
        let state = state.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(err) = consume(state, config, topic.clone(), table, cancel.clone()).await {
                error!(topic, error = %err, "consumer stopped, shutting down");
                cancel.cancel();
            }
        });
    }
    spawn_jobs(&mut tasks, &state, &config, &cancel);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "worker task panicked");
        }
    }
    info!("worker shutdown");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_resolve_with_or_without_prefix() {
        assert_eq!(table_for_topic("likes"), Some(CdcTable::Likes));
        assert_eq!(table_for_topic("cdc.post_comments"), Some(CdcTable::PostComments));
        assert_eq!(table_for_topic("cdc.unknown"), None);
    }
}
