use super::BoxFuture;
use crate::DomainResult;
use crate::notifications::Notification;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationListQuery {
    pub receiver_id: u64,
    pub limit: usize,
    pub offset: usize,
}

pub trait NotificationRepository: Send + Sync {
    fn create(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<Notification>>;
    /// Newest first.
    fn list(&self, query: &NotificationListQuery) -> BoxFuture<'_, DomainResult<Vec<Notification>>>;
    fn unread_count(&self, receiver_id: u64) -> BoxFuture<'_, DomainResult<u64>>;
    fn mark_read(
        &self,
        receiver_id: u64,
        notification_id: &str,
    ) -> BoxFuture<'_, DomainResult<Notification>>;
    fn mark_all_read(&self, receiver_id: u64) -> BoxFuture<'_, DomainResult<u64>>;
}
