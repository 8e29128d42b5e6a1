use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::DomainResult;
use crate::cdc::{DecodeOutcome, MutationEvent, decode};
use crate::error::{Disposition, DomainError};
use crate::ports::BoxFuture;
use crate::ports::log::LogMessage;
use crate::retry::{RetryPolicy, retry_until_cancelled};

/// Applies one decoded mutation.
pub trait EventHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        event: &'a MutationEvent,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, DomainResult<()>>;
}

/// What the batcher runs for every raw log message.
pub trait MessageHandler: Send + Sync {
    fn handle_message<'a>(
        &'a self,
        message: &'a LogMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, DomainResult<()>>;
}

/// Decodes messages of one table and drives its handler with retries.
pub struct Dispatcher {
    table: String,
    handler: Arc<dyn EventHandler>,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(table: impl Into<String>, handler: Arc<dyn EventHandler>, retry: RetryPolicy) -> Self {
        Self {
            table: table.into(),
            handler,
            retry,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Only shutdown surfaces as an error. Everything else ends as a success,
    /// after retries for transient failures.
    pub async fn dispatch(
        &self,
        message: &LogMessage,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let events = match decode(&message.payload, &self.table) {
            DecodeOutcome::Events(events) => events,
            DecodeOutcome::Skip(reason) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    table = %self.table,
                    reason = ?reason,
                    "skipping undecodable message"
                );
                return Ok(());
            }
        };

        for event in &events {
            let label = format!("{}:{}", self.table, event.op.as_str());
            let outcome = retry_until_cancelled(self.retry, cancel, &label, || {
                self.handler.handle(event, cancel)
            })
            .await;
            match outcome {
                Ok(()) => {}
                Err(err) => match err.disposition() {
                    Disposition::Shutdown => return Err(DomainError::Cancelled),
                    Disposition::Skip => warn!(
                        table = %self.table,
                        op = event.op.as_str(),
                        offset = message.offset,
                        error = %err,
                        "skipping event"
                    ),
                    Disposition::Done | Disposition::Retry => debug!(
                        table = %self.table,
                        op = event.op.as_str(),
                        error = %err,
                        "event already applied"
                    ),
                },
            }
        }
        Ok(())
    }
}

impl MessageHandler for Dispatcher {
    fn handle_message<'a>(
        &'a self,
        message: &'a LogMessage,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, DomainResult<()>> {
        Box::pin(self.dispatch(message, cancel))
    }
}
