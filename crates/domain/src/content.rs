use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::cdc::Row;
use crate::error::DomainError;
use crate::moderation::Verdict;

/// Publication state stored in `posts.status` and `post_comments.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Audit,
    Published,
    Rejected,
    HumanReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminDecision {
    Approve,
    Reject,
}

impl ContentStatus {
    pub fn code(self) -> i32 {
        match self {
            ContentStatus::Audit => 0,
            ContentStatus::Published => 1,
            ContentStatus::Rejected => 2,
            ContentStatus::HumanReview => 3,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ContentStatus::Published,
            2 => ContentStatus::Rejected,
            3 => ContentStatus::HumanReview,
            _ => ContentStatus::Audit,
        }
    }

    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => ContentStatus::Published,
            Verdict::Warn => ContentStatus::HumanReview,
            Verdict::Deny => ContentStatus::Rejected,
        }
    }

    /// Status after a moderation verdict, or `None` when the row is not
    /// awaiting one. Rejected is terminal; human review waits for an admin.
    pub fn after_verdict(self, verdict: Verdict) -> Option<Self> {
        match self {
            ContentStatus::Audit | ContentStatus::Published => Some(Self::from_verdict(verdict)),
            ContentStatus::Rejected | ContentStatus::HumanReview => None,
        }
    }

    pub fn after_admin(self, decision: AdminDecision) -> DomainResult<Self> {
        match (self, decision) {
            (ContentStatus::HumanReview, AdminDecision::Approve) => Ok(ContentStatus::Published),
            (ContentStatus::HumanReview, AdminDecision::Reject) => Ok(ContentStatus::Rejected),
            (status, decision) => Err(DomainError::Validation(format!(
                "{decision:?} is not allowed from {status:?}"
            ))),
        }
    }

    pub fn is_indexable(self) -> bool {
        self == ContentStatus::Published
    }
}

/// Attached media as stored in `post_media` or a comment's `media_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MediaItem {
    #[serde(default, alias = "mimeType", alias = "file_type")]
    pub mime_type: String,
    #[serde(default, alias = "media_url")]
    pub url: String,
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
    /// Seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaItem {
    pub fn kind(&self) -> MediaKind {
        match self.mime_type.split('/').next().unwrap_or_default() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub author_id: u64,
    pub title: String,
    pub content: String,
    pub status: ContentStatus,
    pub is_deleted: bool,
    pub content_version: i64,
    pub likes_count: i64,
    pub comments_count: i64,
    pub collects_count: i64,
    pub views_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.u64("id"),
            author_id: row.u64("user_id"),
            title: row.string("title"),
            content: row.string("content"),
            status: ContentStatus::from_code(row.i32("status")),
            is_deleted: row.bool("is_deleted"),
            content_version: row.i64("content_version"),
            likes_count: row.i64("likes_count"),
            comments_count: row.i64("comments_count"),
            collects_count: row.i64("collects_count"),
            views_count: row.i64("views_count"),
            created_at: row
                .datetime("created_at")
                .map(|value| value.unix_timestamp())
                .unwrap_or_default(),
            updated_at: row
                .datetime("updated_at")
                .map(|value| value.unix_timestamp())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub post_id: u64,
    pub user_id: u64,
    pub root_id: u64,
    pub parent_id: u64,
    pub reply_to_user: u64,
    pub content: String,
    pub media: Vec<MediaItem>,
    pub status: ContentStatus,
    pub is_deleted: bool,
    pub created_at: i64,
}

impl Comment {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.u64("id"),
            post_id: row.u64("post_id"),
            user_id: row.u64("user_id"),
            root_id: row.u64("root_id"),
            parent_id: row.u64("parent_id"),
            reply_to_user: row.u64("reply_to_user_id"),
            content: row.string("content"),
            media: row.json("media_info"),
            status: ContentStatus::from_code(row.i32("status")),
            is_deleted: row.bool("is_deleted"),
            created_at: row
                .datetime("created_at")
                .map(|value| value.unix_timestamp())
                .unwrap_or_default(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.root_id == 0
    }

    /// A reply must hang off an existing root comment of the same post.
    pub fn validate_thread(&self, root: Option<&Comment>) -> DomainResult<()> {
        if self.is_root() {
            return Ok(());
        }
        let Some(root) = root else {
            return Err(DomainError::Validation(format!(
                "comment {} references missing root {}",
                self.id, self.root_id
            )));
        };
        if root.post_id != self.post_id || !root.is_root() {
            return Err(DomainError::Validation(format!(
                "comment {} references invalid root {}",
                self.id, self.root_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserProfile {
    pub user_id: u64,
    pub nickname: String,
    pub avatar_url: String,
    pub bio: String,
    pub followers_count: i64,
    pub following_count: i64,
}

impl UserProfile {
    pub fn from_row(row: &Row) -> Self {
        Self {
            user_id: row.u64("user_id"),
            nickname: row.string("nickname"),
            avatar_url: row.string("avatar_url"),
            bio: row.string("bio"),
            followers_count: row.i64("followers_count"),
            following_count: row.i64("following_count"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PostTags {
    pub post_id: u64,
    pub main_tag: Option<String>,
    pub ai_tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdicts_map_to_row_status() {
        assert_eq!(
            ContentStatus::Audit.after_verdict(Verdict::Deny),
            Some(ContentStatus::Rejected)
        );
        assert_eq!(
            ContentStatus::Audit.after_verdict(Verdict::Warn),
            Some(ContentStatus::HumanReview)
        );
        assert_eq!(
            ContentStatus::Audit.after_verdict(Verdict::Pass),
            Some(ContentStatus::Published)
        );
        assert_eq!(ContentStatus::Rejected.after_verdict(Verdict::Pass), None);
    }

    #[test]
    fn admin_decisions_only_leave_human_review() {
        assert_eq!(
            ContentStatus::HumanReview
                .after_admin(AdminDecision::Approve)
                .unwrap(),
            ContentStatus::Published
        );
        assert!(ContentStatus::Rejected
            .after_admin(AdminDecision::Approve)
            .is_err());
    }

    #[test]
    fn reply_must_point_at_root_of_same_post() {
        let root = Comment::from_row(&Row::from_pairs([("id", "1"), ("post_id", "9")]));
        let reply = Comment::from_row(&Row::from_pairs([
            ("id", "2"),
            ("post_id", "9"),
            ("root_id", "1"),
        ]));
        assert!(reply.validate_thread(Some(&root)).is_ok());
        assert!(reply.validate_thread(None).is_err());

        let nested = Comment::from_row(&Row::from_pairs([
            ("id", "3"),
            ("post_id", "9"),
            ("root_id", "2"),
        ]));
        assert!(nested.validate_thread(Some(&reply)).is_err());
    }

    #[test]
    fn media_kind_uses_mime_prefix() {
        let row = Row::from_pairs([(
            "media_info",
            r#"[{"mimeType":"video/mp4","url":"v.mp4","duration":12.5}]"#,
        )]);
        let media: Vec<MediaItem> = row.json("media_info");
        assert_eq!(media[0].kind(), MediaKind::Video);
        assert_eq!(media[0].duration, 12.5);
    }
}
