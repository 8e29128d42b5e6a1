use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::DomainResult;
use crate::content::Comment;
use crate::error::DomainError;
use crate::follows::FollowEdge;
use crate::ports::kv::Publisher;
use crate::ports::notifications::{NotificationListQuery, NotificationRepository};
use crate::ports::store::ContentRepository;
use crate::util::{now_ms, uuid_v7_without_dashes};

pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NotificationType {
    PostLike,
    PostCollect,
    Comment,
    CommentLike,
    NewFollower,
}

impl NotificationType {
    pub fn code(self) -> u8 {
        match self {
            NotificationType::PostLike => 1,
            NotificationType::PostCollect => 2,
            NotificationType::Comment => 3,
            NotificationType::CommentLike => 4,
            NotificationType::NewFollower => 5,
        }
    }

    /// Body text for actions that carry no user-written content.
    pub fn summary(self) -> &'static str {
        match self {
            NotificationType::PostLike => "点赞了你的帖子",
            NotificationType::PostCollect => "收藏了你的帖子",
            NotificationType::NewFollower => "关注了你",
            NotificationType::Comment | NotificationType::CommentLike => "",
        }
    }

    /// Comment activity is pushed to the receiver's unread channel.
    fn pushes_unread(self) -> bool {
        matches!(
            self,
            NotificationType::Comment | NotificationType::CommentLike
        )
    }
}

impl From<NotificationType> for u8 {
    fn from(value: NotificationType) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for NotificationType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NotificationType::PostLike),
            2 => Ok(NotificationType::PostCollect),
            3 => Ok(NotificationType::Comment),
            4 => Ok(NotificationType::CommentLike),
            5 => Ok(NotificationType::NewFollower),
            other => Err(format!("unknown notification type {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub receiver_id: u64,
    pub sender_id: u64,
    pub kind: NotificationType,
    pub target_id: u64,
    pub content: String,
    pub payload: Value,
    pub is_read: bool,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub receiver_id: u64,
    pub sender_id: u64,
    pub kind: NotificationType,
    pub target_id: u64,
    pub content: String,
    pub payload: Value,
}

pub fn unread_channel(receiver_id: u64) -> String {
    format!("notify:unread:{receiver_id}")
}

#[derive(Clone)]
pub struct NotificationService {
    repository: Arc<dyn NotificationRepository>,
    content: Arc<dyn ContentRepository>,
    publisher: Arc<dyn Publisher>,
}

impl NotificationService {
    pub fn new(
        repository: Arc<dyn NotificationRepository>,
        content: Arc<dyn ContentRepository>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            repository,
            content,
            publisher,
        }
    }

    /// Writes the notification unless it is a self-action.
    pub async fn emit(&self, draft: NotificationDraft) -> DomainResult<Option<Notification>> {
        if draft.receiver_id == 0 || draft.sender_id == draft.receiver_id {
            return Ok(None);
        }
        let notification = Notification {
            notification_id: uuid_v7_without_dashes(),
            receiver_id: draft.receiver_id,
            sender_id: draft.sender_id,
            kind: draft.kind,
            target_id: draft.target_id,
            content: draft.content,
            payload: draft.payload,
            is_read: false,
            created_at_ms: now_ms(),
        };
        let stored = match self.repository.create(&notification).await {
            Ok(stored) => stored,
            Err(DomainError::Conflict) => return Ok(None),
            Err(err) => return Err(err),
        };
        if stored.kind.pushes_unread() {
            self.push_unread(stored.receiver_id).await;
        }
        Ok(Some(stored))
    }

    async fn push_unread(&self, receiver_id: u64) {
        let count = match self.repository.unread_count(receiver_id).await {
            Ok(count) => count,
            Err(err) => {
                warn!(receiver_id, error = %err, "unread count lookup failed");
                return;
            }
        };
        let payload = json!({ "unread": count }).to_string();
        if let Err(err) = self
            .publisher
            .publish(&unread_channel(receiver_id), &payload)
            .await
        {
            warn!(receiver_id, error = %err, "unread count publish failed");
        }
    }

    pub async fn post_liked(&self, post_id: u64, sender_id: u64) -> DomainResult<Option<Notification>> {
        self.post_action(post_id, sender_id, NotificationType::PostLike)
            .await
    }

    pub async fn post_collected(
        &self,
        post_id: u64,
        sender_id: u64,
    ) -> DomainResult<Option<Notification>> {
        self.post_action(post_id, sender_id, NotificationType::PostCollect)
            .await
    }

    async fn post_action(
        &self,
        post_id: u64,
        sender_id: u64,
        kind: NotificationType,
    ) -> DomainResult<Option<Notification>> {
        let Some(post) = self.content.get_post(post_id).await? else {
            debug!(post_id, "notification target post missing");
            return Ok(None);
        };
        self.emit(NotificationDraft {
            receiver_id: post.author_id,
            sender_id,
            kind,
            target_id: post_id,
            content: kind.summary().to_string(),
            payload: json!({ "post_title": post.title }),
        })
        .await
    }

    /// Replies notify the replied-to user, top-level comments the post author.
    pub async fn post_commented(&self, comment: &Comment) -> DomainResult<Option<Notification>> {
        let Some(post) = self.content.get_post(comment.post_id).await? else {
            debug!(post_id = comment.post_id, "notification target post missing");
            return Ok(None);
        };
        let receiver_id = if comment.reply_to_user > 0 {
            comment.reply_to_user
        } else {
            post.author_id
        };
        self.emit(NotificationDraft {
            receiver_id,
            sender_id: comment.user_id,
            kind: NotificationType::Comment,
            target_id: comment.post_id,
            content: comment.content.clone(),
            payload: json!({
                "comment_id": comment.id,
                "root_id": comment.root_id,
                "post_title": post.title,
            }),
        })
        .await
    }

    pub async fn comment_liked(
        &self,
        comment_id: u64,
        sender_id: u64,
    ) -> DomainResult<Option<Notification>> {
        let Some(comment) = self.content.get_comment(comment_id).await? else {
            debug!(comment_id, "notification target comment missing");
            return Ok(None);
        };
        let post_title = self
            .content
            .get_post(comment.post_id)
            .await?
            .map(|post| post.title)
            .unwrap_or_default();
        self.emit(NotificationDraft {
            receiver_id: comment.user_id,
            sender_id,
            kind: NotificationType::CommentLike,
            target_id: comment.post_id,
            content: comment.content,
            payload: json!({ "comment_id": comment_id, "post_title": post_title }),
        })
        .await
    }

    pub async fn followed(&self, edge: &FollowEdge) -> DomainResult<Option<Notification>> {
        self.emit(NotificationDraft {
            receiver_id: edge.following_id,
            sender_id: edge.follower_id,
            kind: NotificationType::NewFollower,
            target_id: edge.follower_id,
            content: NotificationType::NewFollower.summary().to_string(),
            payload: Value::Null,
        })
        .await
    }

    pub async fn list(
        &self,
        receiver_id: u64,
        limit: usize,
        offset: usize,
    ) -> DomainResult<Vec<Notification>> {
        let query = NotificationListQuery {
            receiver_id,
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            offset,
        };
        self.repository.list(&query).await
    }

    pub async fn unread_count(&self, receiver_id: u64) -> DomainResult<u64> {
        self.repository.unread_count(receiver_id).await
    }

    pub async fn mark_read(
        &self,
        receiver_id: u64,
        notification_id: &str,
    ) -> DomainResult<Notification> {
        self.repository.mark_read(receiver_id, notification_id).await
    }

    pub async fn mark_all_read(&self, receiver_id: u64) -> DomainResult<u64> {
        self.repository.mark_all_read(receiver_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip_through_serde() {
        let encoded = serde_json::to_string(&NotificationType::CommentLike).unwrap();
        assert_eq!(encoded, "4");
        let decoded: NotificationType = serde_json::from_str("5").unwrap();
        assert_eq!(decoded, NotificationType::NewFollower);
        assert!(serde_json::from_str::<NotificationType>("9").is_err());
    }

    #[test]
    fn action_only_notifications_carry_a_summary() {
        assert_eq!(NotificationType::PostLike.summary(), "点赞了你的帖子");
        assert_eq!(NotificationType::PostCollect.summary(), "收藏了你的帖子");
        assert_eq!(NotificationType::NewFollower.summary(), "关注了你");
        assert!(NotificationType::Comment.summary().is_empty());
    }
}
