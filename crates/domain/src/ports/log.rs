use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Highest processed offset for one partition of the consumed topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log unavailable: {0}")]
    Unavailable(String),
    #[error("offset commit failed: {0}")]
    Commit(String),
}

/// Pull side of one topic subscription.
///
/// `next_message` must be cancel safe: the batcher drops the pending future
/// whenever a flush deadline or shutdown wins the race.
pub trait MessageSource: Send {
    fn topic(&self) -> &str;
    fn next_message(&mut self) -> BoxFuture<'_, Result<Option<LogMessage>, LogError>>;
    fn commit(&mut self, checkpoints: Vec<Checkpoint>) -> BoxFuture<'_, Result<(), LogError>>;
}
