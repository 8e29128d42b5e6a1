use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DomainResult;
use crate::cdc::{MutationEvent, Op};
use crate::content::{Comment, ContentStatus, MediaItem, Post, PostTags, UserProfile};
use crate::counters::{CountKind, CounterService, Delta};
use crate::dispatch::EventHandler;
use crate::error::DomainError;
use crate::follows::{FollowCacheWriter, FollowEdge};
use crate::indexing::{IndexWriter, PostEnrichment};
use crate::interests::{InterestAction, InterestRecorder};
use crate::moderation::{AuditRequest, ContentModerator, Verdict};
use crate::notifications::NotificationService;
use crate::ports::BoxFuture;
use crate::ports::store::ContentRepository;
use crate::util::extract_hashtags;

/// Source tables with a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CdcTable {
    Posts,
    PostComments,
    Likes,
    Collections,
    CommentLikes,
    PostViews,
    UserFollows,
    UserDetail,
}

impl CdcTable {
    pub const ALL: [CdcTable; 8] = [
        CdcTable::Posts,
        CdcTable::PostComments,
        CdcTable::Likes,
        CdcTable::Collections,
        CdcTable::CommentLikes,
        CdcTable::PostViews,
        CdcTable::UserFollows,
        CdcTable::UserDetail,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CdcTable::Posts => "posts",
            CdcTable::PostComments => "post_comments",
            CdcTable::Likes => "likes",
            CdcTable::Collections => "collections",
            CdcTable::CommentLikes => "comment_likes",
            CdcTable::PostViews => "post_views",
            CdcTable::UserFollows => "user_follows",
            CdcTable::UserDetail => "user_detail",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|table| table.name() == name)
    }
}

/// Everything the table handlers write to.
#[derive(Clone)]
pub struct PipelineServices {
    pub content: Arc<dyn ContentRepository>,
    pub counters: CounterService,
    pub follows: FollowCacheWriter,
    pub notifications: NotificationService,
    pub moderator: ContentModerator,
    pub index: IndexWriter,
    pub interests: InterestRecorder,
}

pub struct TableHandler {
    table: CdcTable,
    services: PipelineServices,
}

impl TableHandler {
    pub fn new(table: CdcTable, services: PipelineServices) -> Self {
        Self { table, services }
    }

    pub fn table(&self) -> CdcTable {
        self.table
    }

    async fn apply(&self, event: &MutationEvent, cancel: &CancellationToken) -> DomainResult<()> {
        match self.table {
            CdcTable::Posts => self.on_post(event, cancel).await,
            CdcTable::PostComments => self.on_comment(event, cancel).await,
            CdcTable::Likes => {
                self.on_post_action(event, CountKind::PostLike, Some(InterestAction::Like), cancel)
                    .await
            }
            CdcTable::Collections => {
                self.on_post_action(
                    event,
                    CountKind::PostCollect,
                    Some(InterestAction::Collect),
                    cancel,
                )
                .await
            }
            CdcTable::PostViews => {
                self.on_post_action(event, CountKind::PostView, Some(InterestAction::View), cancel)
                    .await
            }
            CdcTable::CommentLikes => self.on_comment_like(event).await,
            CdcTable::UserFollows => self.on_follow(event).await,
            CdcTable::UserDetail => self.on_user_detail(event, cancel).await,
        }
    }

    async fn on_post(&self, event: &MutationEvent, cancel: &CancellationToken) -> DomainResult<()> {
        let post = Post::from_row(&event.after);
        if post.id == 0 {
            return Err(DomainError::Validation("post row without id".to_string()));
        }
        let services = &self.services;
        if event.op == Op::Delete || post.is_deleted {
            services.index.delete_post(post.id).await?;
            return Ok(());
        }

        let media = services.content.post_media(post.id).await?;
        if event.op == Op::Update && !event.changed("content_version") {
            return self.reindex_post(&post, media, event.ts, cancel).await;
        }
        if post.status.after_verdict(Verdict::Pass).is_none() {
            debug!(post_id = post.id, status = ?post.status, "post is not awaiting audit");
            return Ok(());
        }

        let user_tags = extract_hashtags(&post.content);
        let request = AuditRequest {
            title: post.title.clone(),
            content: post.content.clone(),
            media: media.clone(),
            audit_only: false,
        };
        let result = services.moderator.process(&request, cancel).await?;
        if result.verdict == Verdict::Deny {
            services
                .content
                .update_post_status(post.id, ContentStatus::Rejected)
                .await?;
            if event.op == Op::Update {
                services.index.delete_post(post.id).await?;
            }
            info!(post_id = post.id, "post rejected by moderation");
            return Ok(());
        }

        let status = ContentStatus::from_verdict(result.verdict);
        let tags = services.moderator.aggregate_tags(&result, cancel).await?;
        services
            .content
            .save_post_tags(&PostTags {
                post_id: post.id,
                main_tag: tags.main_tag.clone(),
                ai_tags: tags.tags.clone(),
            })
            .await?;
        services.content.update_post_status(post.id, status).await?;

        if !status.is_indexable() {
            if event.op == Op::Update {
                services.index.delete_post(post.id).await?;
            }
            debug!(post_id = post.id, status = ?status, "post held back from search");
            return Ok(());
        }
        let text = format!("{}\n{}", post.title, post.content);
        let vector = services.moderator.embed(&text, cancel).await?;
        let published = Post { status, ..post };
        services
            .index
            .index_post(
                &published,
                PostEnrichment {
                    main_tag: tags.main_tag,
                    user_tags,
                    ai_tags: tags.tags,
                    media,
                    content_vector: Some(vector),
                },
                event.ts,
                cancel,
            )
            .await?;
        Ok(())
    }

    /// The content is unchanged: keep the classification and follow the status.
    async fn reindex_post(
        &self,
        post: &Post,
        media: Vec<MediaItem>,
        version: i64,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let services = &self.services;
        if !post.status.is_indexable() {
            services.index.delete_post(post.id).await?;
            return Ok(());
        }
        let enrichment = match services.index.existing_post(post.id).await? {
            Some(document) => PostEnrichment::from_existing(&document, media),
            None => {
                let tags = services.content.post_tags(post.id).await?.unwrap_or_default();
                PostEnrichment {
                    main_tag: tags.main_tag,
                    user_tags: extract_hashtags(&post.content),
                    ai_tags: tags.ai_tags,
                    media,
                    content_vector: None,
                }
            }
        };
        services
            .index
            .index_post(post, enrichment, version, cancel)
            .await?;
        Ok(())
    }

    async fn on_comment(
        &self,
        event: &MutationEvent,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let comment = Comment::from_row(&event.after);
        if comment.id == 0 || comment.post_id == 0 {
            return Err(DomainError::Validation(
                "comment row without id or post".to_string(),
            ));
        }
        let services = &self.services;
        match event.op {
            Op::Insert => {
                if comment.is_deleted {
                    return Ok(());
                }
                let root = if comment.is_root() {
                    None
                } else {
                    services.content.get_comment(comment.root_id).await?
                };
                comment.validate_thread(root.as_ref())?;
                if comment.status.after_verdict(Verdict::Pass).is_none() {
                    return Ok(());
                }
                let request = AuditRequest {
                    title: String::new(),
                    content: comment.content.clone(),
                    media: comment.media.clone(),
                    audit_only: true,
                };
                let result = services.moderator.process(&request, cancel).await?;
                let status = ContentStatus::from_verdict(result.verdict);
                services
                    .content
                    .update_comment_status(comment.id, status)
                    .await?;
                if status != ContentStatus::Published {
                    debug!(comment_id = comment.id, status = ?status, "comment not published");
                    return Ok(());
                }
                services
                    .counters
                    .record(CountKind::PostComment, comment.post_id, Delta::Up)
                    .await?;
                best_effort("comment notification", services.notifications.post_commented(&comment))
                    .await
            }
            Op::Update if event.is_soft_delete() => self.retract_comment(&comment).await,
            Op::Update => Ok(()),
            Op::Delete if !comment.is_deleted => self.retract_comment(&comment).await,
            Op::Delete => Ok(()),
        }
    }

    /// Only comments that were counted are taken back out.
    async fn retract_comment(&self, comment: &Comment) -> DomainResult<()> {
        if comment.status != ContentStatus::Published {
            return Ok(());
        }
        self.services
            .counters
            .record(CountKind::PostComment, comment.post_id, Delta::Down)
            .await
    }

    async fn on_post_action(
        &self,
        event: &MutationEvent,
        kind: CountKind,
        interest: Option<InterestAction>,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        let user_id = event.after.u64("user_id");
        let post_id = event.after.u64("post_id");
        if post_id == 0 {
            return Err(DomainError::Validation(format!(
                "{} row without post_id",
                event.table
            )));
        }
        let services = &self.services;
        let delta = match event.op {
            Op::Insert => Delta::Up,
            Op::Delete => Delta::Down,
            Op::Update => return Ok(()),
        };
        services.counters.record(kind, post_id, delta).await?;
        if delta == Delta::Down {
            return Ok(());
        }

        match kind {
            CountKind::PostLike => {
                best_effort("like notification", services.notifications.post_liked(post_id, user_id))
                    .await?
            }
            CountKind::PostCollect => {
                best_effort(
                    "collect notification",
                    services.notifications.post_collected(post_id, user_id),
                )
                .await?
            }
            _ => {}
        }
        if let Some(action) = interest {
            best_effort(
                "interest update",
                services.interests.record(user_id, post_id, action, cancel),
            )
            .await?;
        }
        Ok(())
    }

    async fn on_comment_like(&self, event: &MutationEvent) -> DomainResult<()> {
        let user_id = event.after.u64("user_id");
        let comment_id = event.after.u64("comment_id");
        if comment_id == 0 {
            return Err(DomainError::Validation(
                "comment like without comment_id".to_string(),
            ));
        }
        let services = &self.services;
        let delta = match event.op {
            Op::Insert => Delta::Up,
            Op::Delete => Delta::Down,
            Op::Update => return Ok(()),
        };
        services
            .counters
            .record(CountKind::CommentLike, comment_id, delta)
            .await?;
        services
            .counters
            .track_comment_liker(comment_id, user_id, delta)
            .await?;
        if delta == Delta::Up {
            best_effort(
                "comment like notification",
                services.notifications.comment_liked(comment_id, user_id),
            )
            .await?;
        }
        Ok(())
    }

    async fn on_follow(&self, event: &MutationEvent) -> DomainResult<()> {
        let edge = FollowEdge::from_row(&event.after)?;
        let services = &self.services;
        match event.op {
            Op::Insert => {
                services.follows.apply(&edge, Delta::Up).await?;
                best_effort("follow notification", services.notifications.followed(&edge)).await
            }
            Op::Delete => services.follows.apply(&edge, Delta::Down).await,
            Op::Update => Ok(()),
        }
    }

    async fn on_user_detail(
        &self,
        event: &MutationEvent,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        if event.op == Op::Delete {
            return Ok(());
        }
        let profile = UserProfile::from_row(&event.after);
        if profile.user_id == 0 {
            return Err(DomainError::Validation(
                "user_detail row without user_id".to_string(),
            ));
        }
        self.services
            .index
            .index_user(&profile, event.ts, cancel)
            .await?;
        Ok(())
    }
}

impl EventHandler for TableHandler {
    fn handle<'a>(
        &'a self,
        event: &'a MutationEvent,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, DomainResult<()>> {
        Box::pin(self.apply(event, cancel))
    }
}

/// Failures after the counter write are logged, not retried. Shutdown still
/// propagates.
async fn best_effort<T, Fut>(what: &str, work: Fut) -> DomainResult<()>
where
    Fut: Future<Output = DomainResult<T>>,
{
    match work.await {
        Ok(_) => Ok(()),
        Err(DomainError::Cancelled) => Err(DomainError::Cancelled),
        Err(err) => {
            warn!(error = %err, "{what} failed");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_round_trip() {
        for table in CdcTable::ALL {
            assert_eq!(CdcTable::parse(table.name()), Some(table));
        }
        assert_eq!(CdcTable::parse("user_roles"), None);
    }
}
