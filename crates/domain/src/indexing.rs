use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::DomainResult;
use crate::content::{MediaItem, Post, UserProfile};
use crate::locks::{LockManager, user_detail_lock_key, user_index_lock_key};
use crate::ports::search::{IndexWrite, SearchIndex};
use crate::ports::store::ContentRepository;

pub const POST_ENRICH_LOCK_TTL: Duration = Duration::from_secs(5);
pub const USER_INDEX_LOCK_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PostDocument {
    pub id: u64,
    pub author_id: u64,
    #[serde(default)]
    pub author_nickname: String,
    #[serde(default)]
    pub author_avatar: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub main_tag: Option<String>,
    #[serde(default)]
    pub user_tags: Vec<String>,
    #[serde(default)]
    pub ai_tags: Vec<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub collects_count: i64,
    #[serde(default)]
    pub views_count: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserDocument {
    pub user_id: u64,
    pub nickname: String,
    pub avatar_url: String,
    pub bio: String,
    pub followers_count: i64,
    pub following_count: i64,
}

impl From<&UserProfile> for UserDocument {
    fn from(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.user_id,
            nickname: profile.nickname.clone(),
            avatar_url: profile.avatar_url.clone(),
            bio: profile.bio.clone(),
            followers_count: profile.followers_count,
            following_count: profile.following_count,
        }
    }
}

/// Tag and vector enrichment decided upstream of the index write.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostEnrichment {
    pub main_tag: Option<String>,
    pub user_tags: Vec<String>,
    pub ai_tags: Vec<String>,
    pub media: Vec<MediaItem>,
    pub content_vector: Option<Vec<f32>>,
}

impl PostEnrichment {
    /// Carries the classification of an already indexed document forward.
    pub fn from_existing(document: &PostDocument, media: Vec<MediaItem>) -> Self {
        Self {
            main_tag: document.main_tag.clone(),
            user_tags: document.user_tags.clone(),
            ai_tags: document.ai_tags.clone(),
            media,
            content_vector: document.content_vector.clone(),
        }
    }
}

#[derive(Clone)]
pub struct IndexWriter {
    index: Arc<dyn SearchIndex>,
    content: Arc<dyn ContentRepository>,
    locks: LockManager,
}

impl IndexWriter {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        content: Arc<dyn ContentRepository>,
        locks: LockManager,
    ) -> Self {
        Self {
            index,
            content,
            locks,
        }
    }

    pub async fn existing_post(&self, post_id: u64) -> DomainResult<Option<PostDocument>> {
        self.index.get_post(post_id).await
    }

    /// Joins the row with the author's profile under the author lock and
    /// writes it with `version` as the external version.
    pub async fn index_post(
        &self,
        post: &Post,
        enrichment: PostEnrichment,
        version: i64,
        cancel: &CancellationToken,
    ) -> DomainResult<IndexWrite> {
        let lock_key = user_detail_lock_key(post.author_id);
        let outcome = self
            .locks
            .with_lock(&lock_key, POST_ENRICH_LOCK_TTL, cancel, || async move {
                let profile = self.content.get_user_profile(post.author_id).await?;
                if profile.is_none() {
                    warn!(post_id = post.id, author_id = post.author_id, "post author profile missing");
                }
                let profile = profile.unwrap_or_default();
                let document = PostDocument {
                    id: post.id,
                    author_id: post.author_id,
                    author_nickname: profile.nickname,
                    author_avatar: profile.avatar_url,
                    title: post.title.clone(),
                    content: post.content.clone(),
                    status: post.status.code(),
                    main_tag: enrichment.main_tag,
                    user_tags: enrichment.user_tags,
                    ai_tags: enrichment.ai_tags,
                    media: enrichment.media,
                    likes_count: post.likes_count,
                    comments_count: post.comments_count,
                    collects_count: post.collects_count,
                    views_count: post.views_count,
                    created_at: post.created_at,
                    updated_at: post.updated_at,
                    content_vector: enrichment.content_vector,
                };
                self.index.upsert_post(&document, version).await
            })
            .await?;
        if outcome == IndexWrite::Stale {
            debug!(post_id = post.id, version, "stale post write ignored");
        }
        Ok(outcome)
    }

    pub async fn delete_post(&self, post_id: u64) -> DomainResult<IndexWrite> {
        let outcome = self.index.delete_post(post_id).await?;
        if outcome == IndexWrite::Absent {
            debug!(post_id, "post was not indexed");
        }
        Ok(outcome)
    }

    /// Serialises per-user writes across partitions, then pushes the new
    /// nickname and avatar into the author's post documents.
    pub async fn index_user(
        &self,
        profile: &UserProfile,
        version: i64,
        cancel: &CancellationToken,
    ) -> DomainResult<IndexWrite> {
        let document = UserDocument::from(profile);
        let outcome = self
            .locks
            .with_lock(
                &user_index_lock_key(profile.user_id),
                USER_INDEX_LOCK_TTL,
                cancel,
                || self.index.upsert_user(&document, version),
            )
            .await?;
        if outcome != IndexWrite::Applied {
            debug!(user_id = profile.user_id, version, "stale user write ignored");
            return Ok(outcome);
        }

        let touched = self
            .locks
            .with_lock(
                &user_detail_lock_key(profile.user_id),
                POST_ENRICH_LOCK_TTL,
                cancel,
                || {
                    self.index.update_author_profile(
                        profile.user_id,
                        &profile.nickname,
                        &profile.avatar_url,
                    )
                },
            )
            .await?;
        debug!(user_id = profile.user_id, touched, "author profile propagated");
        Ok(outcome)
    }
}
