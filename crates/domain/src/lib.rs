pub mod batch;
pub mod cdc;
pub mod content;
pub mod counters;
pub mod dispatch;
pub mod error;
pub mod follows;
pub mod handlers;
pub mod indexing;
pub mod interests;
pub mod locks;
pub mod memory;
pub mod metrics;
pub mod moderation;
pub mod notifications;
pub mod ports;
pub mod reconcile;
pub mod retry;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
