use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::MessageHandler;
use crate::ports::log::{Checkpoint, LogError, LogMessage, MessageSource};

const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub size: usize,
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 32,
            timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub topic: String,
    pub messages: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub committed: Vec<Checkpoint>,
}

pub trait FlushObserver: Send + Sync {
    fn flushed(&self, report: &FlushReport);
}

/// Highest offset per partition, skipping partitions that would not move forward.
pub fn next_checkpoints(
    messages: &[LogMessage],
    committed: &HashMap<i32, i64>,
) -> Vec<Checkpoint> {
    let mut highest: HashMap<i32, i64> = HashMap::new();
    for message in messages {
        let entry = highest.entry(message.partition).or_insert(message.offset);
        *entry = (*entry).max(message.offset);
    }
    let mut checkpoints: Vec<Checkpoint> = highest
        .into_iter()
        .filter(|(partition, offset)| {
            committed
                .get(partition)
                .is_none_or(|last| offset > last)
        })
        .map(|(partition, offset)| Checkpoint { partition, offset })
        .collect();
    checkpoints.sort_by_key(|checkpoint| checkpoint.partition);
    checkpoints
}

/// Groups messages by count or deadline, runs each group concurrently and
/// commits it only when every message succeeded.
pub struct Batcher {
    config: BatchConfig,
    handler: Arc<dyn MessageHandler>,
    observer: Option<Arc<dyn FlushObserver>>,
    committed: HashMap<i32, i64>,
}

enum Flush {
    Committed,
    Stopped,
}

impl Batcher {
    pub fn new(config: BatchConfig, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            config,
            handler,
            observer: None,
            committed: HashMap::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FlushObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs until the token fires or the source ends. A pending batch is
    /// flushed once on the way out; whatever fails to commit is redelivered
    /// after a restart.
    pub async fn run<S>(&mut self, source: &mut S, cancel: &CancellationToken) -> Result<(), LogError>
    where
        S: MessageSource + ?Sized,
    {
        let size = self.config.size.max(1);
        let mut batch: Vec<LogMessage> = Vec::with_capacity(size);
        let mut deadline = Instant::now() + self.config.timeout;

        loop {
            let received = if batch.is_empty() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    received = source.next_message() => received,
                }
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = sleep_until(deadline) => {
                        match self.flush(source, &mut batch, cancel).await? {
                            Flush::Committed => continue,
                            Flush::Stopped => break,
                        }
                    }
                    received = source.next_message() => received,
                }
            };

            match received {
                Ok(Some(message)) => {
                    if batch.is_empty() {
                        deadline = Instant::now() + self.config.timeout;
                    }
                    batch.push(message);
                    if batch.len() >= size {
                        if let Flush::Stopped = self.flush(source, &mut batch, cancel).await? {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    if !batch.is_empty() {
                        self.flush(source, &mut batch, cancel).await?;
                    }
                    info!(topic = source.topic(), "message source closed");
                    return Ok(());
                }
                Err(err) => {
                    warn!(topic = source.topic(), error = %err, "receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(RECEIVE_BACKOFF) => {}
                    }
                }
            }
        }

        if !batch.is_empty() {
            debug!(
                topic = source.topic(),
                pending = batch.len(),
                "flushing pending messages before exit"
            );
            self.flush(source, &mut batch, cancel).await?;
        }
        info!(topic = source.topic(), "batcher stopped");
        Ok(())
    }

    async fn flush<S>(
        &mut self,
        source: &mut S,
        batch: &mut Vec<LogMessage>,
        cancel: &CancellationToken,
    ) -> Result<Flush, LogError>
    where
        S: MessageSource + ?Sized,
    {
        let started = Instant::now();
        let outcomes = join_all(
            batch
                .iter()
                .map(|message| self.handler.handle_message(message, cancel)),
        )
        .await;
        let failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();

        let mut committed = Vec::new();
        if failed == 0 {
            committed = next_checkpoints(batch, &self.committed);
            if !committed.is_empty() {
                source.commit(committed.clone()).await?;
                for checkpoint in &committed {
                    self.committed.insert(checkpoint.partition, checkpoint.offset);
                }
            }
            debug!(
                topic = source.topic(),
                messages = batch.len(),
                checkpoints = ?committed,
                "batch committed"
            );
        } else {
            warn!(
                topic = source.topic(),
                messages = batch.len(),
                failed,
                "batch not committed"
            );
        }

        let report = FlushReport {
            topic: source.topic().to_string(),
            messages: batch.len(),
            failed,
            elapsed: started.elapsed(),
            committed,
        };
        if let Some(observer) = &self.observer {
            observer.flushed(&report);
        }
        batch.clear();
        Ok(if failed == 0 {
            Flush::Committed
        } else {
            Flush::Stopped
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(partition: i32, offset: i64) -> LogMessage {
        LogMessage {
            topic: "t".into(),
            partition,
            offset,
            key: None,
            payload: Vec::new(),
        }
    }

    #[test]
    fn checkpoints_take_the_highest_offset_per_partition() {
        let batch = vec![message(0, 4), message(1, 9), message(0, 7), message(1, 2)];
        let checkpoints = next_checkpoints(&batch, &HashMap::new());
        assert_eq!(
            checkpoints,
            vec![
                Checkpoint {
                    partition: 0,
                    offset: 7
                },
                Checkpoint {
                    partition: 1,
                    offset: 9
                },
            ]
        );
    }

    #[test]
    fn checkpoints_never_move_backwards() {
        let committed = HashMap::from([(0, 10)]);
        let checkpoints = next_checkpoints(&[message(0, 8), message(0, 10)], &committed);
        assert!(checkpoints.is_empty());
    }
}
