//! In-memory port implementations. They back the test suites and the
//! `memory` data backend of the worker.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use time::Date;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

use crate::DomainResult;
use crate::content::{Comment, ContentStatus, MediaItem, Post, PostTags, UserProfile};
use crate::counters::CountKind;
use crate::error::DomainError;
use crate::follows::FollowDirection;
use crate::indexing::{PostDocument, UserDocument};
use crate::interests::InterestSnapshot;
use crate::metrics::{DailySnapshot, MetricSeries, MetricTotals};
use crate::notifications::Notification;
use crate::ports::BoxFuture;
use crate::ports::kv::{
    CacheStore, CounterStore, DirtySetStore, DistributedLock, KvOp, KvPipeline, LockLease,
    Publisher, SortedSetStore,
};
use crate::ports::log::{Checkpoint, LogError, LogMessage, MessageSource};
use crate::ports::notifications::{NotificationListQuery, NotificationRepository};
use crate::ports::search::{IndexWrite, SearchIndex};
use crate::ports::store::{
    ContentRepository, CountRepository, InterestRepository, MetricRepository,
};
use crate::util::uuid_v7_without_dashes;

fn processing_key(key: &str) -> String {
    format!("{key}:processing")
}

fn wrong_type(key: &str) -> DomainError {
    DomainError::Upstream(format!("WRONGTYPE operation against key {key}"))
}

#[derive(Debug, Clone)]
enum KvValue {
    Int(i64),
    Text(String),
    Set(BTreeSet<String>),
    Sorted(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: KvValue,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn new(value: KvValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct KvState {
    entries: HashMap<String, KvEntry>,
    published: Vec<(String, String)>,
}

impl KvState {
    fn purge(&mut self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|deadline| Instant::now() >= deadline);
        if expired {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut KvEntry> {
        self.purge(key);
        self.entries.get_mut(key)
    }

    fn int_mut(&mut self, key: &str) -> DomainResult<&mut i64> {
        self.purge(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| KvEntry::new(KvValue::Int(0)));
        match &mut entry.value {
            KvValue::Int(value) => Ok(value),
            _ => Err(wrong_type(key)),
        }
    }

    fn set_mut(&mut self, key: &str) -> DomainResult<&mut BTreeSet<String>> {
        self.purge(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| KvEntry::new(KvValue::Set(BTreeSet::new())));
        match &mut entry.value {
            KvValue::Set(members) => Ok(members),
            _ => Err(wrong_type(key)),
        }
    }

    fn sorted_mut(&mut self, key: &str) -> DomainResult<&mut HashMap<String, i64>> {
        self.purge(key);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| KvEntry::new(KvValue::Sorted(HashMap::new())));
        match &mut entry.value {
            KvValue::Sorted(members) => Ok(members),
            _ => Err(wrong_type(key)),
        }
    }

    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|entry| &entry.value) {
            Some(KvValue::Set(members)) => members.is_empty(),
            Some(KvValue::Sorted(members)) => members.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn apply(&mut self, op: KvOp) -> DomainResult<()> {
        match op {
            KvOp::SortedAdd { key, member, score } => {
                self.sorted_mut(&key)?.insert(member, score);
            }
            KvOp::SortedRemove { key, member } => {
                if self.live(&key).is_some() {
                    self.sorted_mut(&key)?.remove(&member);
                    self.drop_if_empty(&key);
                }
            }
            KvOp::SortedTrim { key, keep } => {
                if self.live(&key).is_some() {
                    let members = self.sorted_mut(&key)?;
                    if members.len() > keep {
                        let mut ranked: Vec<(String, i64)> = members.drain().collect();
                        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
                        ranked.truncate(keep);
                        members.extend(ranked);
                    }
                    self.drop_if_empty(&key);
                }
            }
            KvOp::Incr { key } => {
                *self.int_mut(&key)? += 1;
            }
            KvOp::Decr { key } => {
                *self.int_mut(&key)? -= 1;
            }
            KvOp::Expire { key, ttl } => {
                if let Some(entry) = self.live(&key) {
                    entry.expires_at = Some(Instant::now() + ttl);
                }
            }
            KvOp::SetAdd { key, members } => {
                self.set_mut(&key)?.extend(members);
            }
        }
        Ok(())
    }
}

/// Single-process stand-in for the Redis keyspace.
#[derive(Clone, Default)]
pub struct InMemoryKv {
    inner: Arc<Mutex<KvState>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_members(&self, key: &str) -> Vec<String> {
        let mut state = self.inner.lock().await;
        match state.live(key).map(|entry| &entry.value) {
            Some(KvValue::Set(members)) => members.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub async fn sorted_members(&self, key: &str) -> Vec<(String, i64)> {
        let mut state = self.inner.lock().await;
        let mut members: Vec<(String, i64)> = match state.live(key).map(|entry| &entry.value) {
            Some(KvValue::Sorted(members)) => members
                .iter()
                .map(|(member, score)| (member.clone(), *score))
                .collect(),
            _ => Vec::new(),
        };
        members.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        members
    }

    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.inner.lock().await;
        state
            .live(key)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub async fn published(&self) -> Vec<(String, String)> {
        self.inner.lock().await.published.clone()
    }
}

impl KvPipeline for InMemoryKv {
    fn execute(&self, ops: Vec<KvOp>) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.lock().await;
            for op in ops {
                state.apply(op)?;
            }
            Ok(())
        })
    }
}

impl CounterStore for InMemoryKv {
    fn incr(&self, key: &str) -> BoxFuture<'_, DomainResult<i64>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = inner.lock().await;
            let value = state.int_mut(&key)?;
            *value += 1;
            Ok(*value)
        })
    }

    fn decr(&self, key: &str) -> BoxFuture<'_, DomainResult<i64>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = inner.lock().await;
            let value = state.int_mut(&key)?;
            *value -= 1;
            Ok(*value)
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, DomainResult<Option<i64>>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = inner.lock().await;
            match state.live(&key).map(|entry| &entry.value) {
                None => Ok(None),
                Some(KvValue::Int(value)) => Ok(Some(*value)),
                Some(_) => Err(wrong_type(&key)),
            }
        })
    }

    fn set(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = inner.lock().await;
            state.entries.insert(
                key,
                KvEntry {
                    value: KvValue::Int(value),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    fn add_member(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let ops = vec![
            KvOp::SetAdd {
                key: key.to_string(),
                members: vec![member.to_string()],
            },
            KvOp::Expire {
                key: key.to_string(),
                ttl,
            },
        ];
        Box::pin(async move {
            let mut state = inner.lock().await;
            for op in ops {
                state.apply(op)?;
            }
            Ok(())
        })
    }

    fn remove_member(&self, key: &str, member: &str) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        let member = member.to_string();
        Box::pin(async move {
            let mut state = inner.lock().await;
            if state.live(&key).is_some() {
                state.set_mut(&key)?.remove(&member);
                state.drop_if_empty(&key);
            }
            Ok(())
        })
    }
}

impl DirtySetStore for InMemoryKv {
    fn mark(&self, key: &str, members: &[String]) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let op = KvOp::SetAdd {
            key: key.to_string(),
            members: members.to_vec(),
        };
        Box::pin(async move { inner.lock().await.apply(op) })
    }

    fn drain(&self, key: &str) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = inner.lock().await;
            let processing = processing_key(&key);
            state.purge(&key);
            let live = match state.entries.remove(&key).map(|entry| entry.value) {
                None => BTreeSet::new(),
                Some(KvValue::Set(members)) => members,
                Some(_) => return Err(wrong_type(&key)),
            };
            let pending = state.set_mut(&processing)?;
            pending.extend(live);
            let members: Vec<String> = pending.iter().cloned().collect();
            state.drop_if_empty(&processing);
            Ok(members)
        })
    }

    fn complete_drain(&self, key: &str) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let processing = processing_key(key);
        Box::pin(async move {
            inner.lock().await.entries.remove(&processing);
            Ok(())
        })
    }
}

impl SortedSetStore for InMemoryKv {
    fn range_desc(
        &self,
        key: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<(String, i64)>>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move {
            let mut members = store.sorted_members(&key).await;
            members.truncate(limit);
            Ok(members)
        })
    }

    fn exists(&self, key: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        Box::pin(async move { Ok(inner.lock().await.live(&key).is_some()) })
    }
}

impl CacheStore for InMemoryKv {
    fn get(&self, key: &str) -> BoxFuture<'_, DomainResult<Option<String>>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = inner.lock().await;
            match state.live(&key).map(|entry| &entry.value) {
                None => Ok(None),
                Some(KvValue::Text(value)) => Ok(Some(value.clone())),
                Some(_) => Err(wrong_type(&key)),
            }
        })
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            inner.lock().await.entries.insert(
                key,
                KvEntry {
                    value: KvValue::Text(value),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    fn delete(&self, keys: &[String]) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let keys = keys.to_vec();
        Box::pin(async move {
            let mut state = inner.lock().await;
            for key in keys {
                state.entries.remove(&key);
            }
            Ok(())
        })
    }
}

impl DistributedLock for InMemoryKv {
    fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, DomainResult<Option<LockLease>>> {
        let inner = self.inner.clone();
        let key = key.to_string();
        Box::pin(async move {
            let mut state = inner.lock().await;
            if state.live(&key).is_some() {
                return Ok(None);
            }
            let token = uuid_v7_without_dashes();
            state.entries.insert(
                key.clone(),
                KvEntry {
                    value: KvValue::Text(token.clone()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(Some(LockLease { key, token }))
        })
    }

    fn release(&self, lease: &LockLease) -> BoxFuture<'_, DomainResult<bool>> {
        let inner = self.inner.clone();
        let lease = lease.clone();
        Box::pin(async move {
            let mut state = inner.lock().await;
            let held = matches!(
                state.live(&lease.key).map(|entry| &entry.value),
                Some(KvValue::Text(token)) if *token == lease.token
            );
            if held {
                state.entries.remove(&lease.key);
            }
            Ok(held)
        })
    }
}

impl Publisher for InMemoryKv {
    fn publish(&self, channel: &str, payload: &str) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let message = (channel.to_string(), payload.to_string());
        Box::pin(async move {
            inner.lock().await.published.push(message);
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct ContentState {
    posts: HashMap<u64, Post>,
    comments: HashMap<u64, Comment>,
    profiles: HashMap<u64, UserProfile>,
    media: HashMap<u64, Vec<MediaItem>>,
    tags: HashMap<u64, PostTags>,
    likes: HashSet<(u64, u64)>,
    collections: HashSet<(u64, u64)>,
    views: Vec<(u64, u64)>,
    comment_likes: HashSet<(u64, u64)>,
    comment_like_counts: HashMap<u64, i64>,
    follows: HashMap<(u64, u64), i64>,
}

/// Relational rows keyed the way the MySQL tables are.
#[derive(Clone, Default)]
pub struct InMemoryContentStore {
    inner: Arc<RwLock<ContentState>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_post(&self, post: Post) {
        self.inner.write().await.posts.insert(post.id, post);
    }

    pub async fn insert_comment(&self, comment: Comment) {
        self.inner.write().await.comments.insert(comment.id, comment);
    }

    pub async fn insert_profile(&self, profile: UserProfile) {
        self.inner
            .write()
            .await
            .profiles
            .insert(profile.user_id, profile);
    }

    pub async fn set_media(&self, post_id: u64, media: Vec<MediaItem>) {
        self.inner.write().await.media.insert(post_id, media);
    }

    /// `AlreadyActed` when the `(user, post)` pair exists.
    pub async fn add_like(&self, user_id: u64, post_id: u64) -> DomainResult<()> {
        if self.inner.write().await.likes.insert((user_id, post_id)) {
            Ok(())
        } else {
            Err(DomainError::AlreadyActed)
        }
    }

    pub async fn remove_like(&self, user_id: u64, post_id: u64) {
        self.inner.write().await.likes.remove(&(user_id, post_id));
    }

    pub async fn add_collection(&self, user_id: u64, post_id: u64) -> DomainResult<()> {
        if self.inner.write().await.collections.insert((user_id, post_id)) {
            Ok(())
        } else {
            Err(DomainError::AlreadyActed)
        }
    }

    pub async fn add_view(&self, user_id: u64, post_id: u64) {
        self.inner.write().await.views.push((user_id, post_id));
    }

    pub async fn add_comment_like(&self, user_id: u64, comment_id: u64) -> DomainResult<()> {
        if self
            .inner
            .write()
            .await
            .comment_likes
            .insert((user_id, comment_id))
        {
            Ok(())
        } else {
            Err(DomainError::AlreadyActed)
        }
    }

    pub async fn add_follow(&self, follower_id: u64, following_id: u64, created_at: i64) {
        self.inner
            .write()
            .await
            .follows
            .insert((follower_id, following_id), created_at);
    }

    pub async fn remove_follow(&self, follower_id: u64, following_id: u64) {
        self.inner
            .write()
            .await
            .follows
            .remove(&(follower_id, following_id));
    }

    pub async fn comment_likes_count(&self, comment_id: u64) -> Option<i64> {
        self.inner
            .read()
            .await
            .comment_like_counts
            .get(&comment_id)
            .copied()
    }
}

impl ContentRepository for InMemoryContentStore {
    fn get_post(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Option<Post>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.posts.get(&post_id).cloned()) })
    }

    fn get_comment(&self, comment_id: u64) -> BoxFuture<'_, DomainResult<Option<Comment>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.comments.get(&comment_id).cloned()) })
    }

    fn get_user_profile(&self, user_id: u64) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.profiles.get(&user_id).cloned()) })
    }

    fn post_media(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Vec<MediaItem>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .media
                .get(&post_id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn post_tags(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Option<PostTags>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.tags.get(&post_id).cloned()) })
    }

    fn save_post_tags(&self, tags: &PostTags) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let tags = tags.clone();
        Box::pin(async move {
            inner.write().await.tags.insert(tags.post_id, tags);
            Ok(())
        })
    }

    fn update_post_status(
        &self,
        post_id: u64,
        status: ContentStatus,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let post = state.posts.get_mut(&post_id).ok_or(DomainError::NotFound)?;
            post.status = status;
            Ok(())
        })
    }

    fn update_comment_status(
        &self,
        comment_id: u64,
        status: ContentStatus,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let comment = state
                .comments
                .get_mut(&comment_id)
                .ok_or(DomainError::NotFound)?;
            comment.status = status;
            Ok(())
        })
    }
}

impl CountRepository for InMemoryContentStore {
    fn count(&self, kind: CountKind, entity_id: u64) -> BoxFuture<'_, DomainResult<i64>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            let count = match kind {
                CountKind::PostLike => state
                    .likes
                    .iter()
                    .filter(|(_, post_id)| *post_id == entity_id)
                    .count(),
                CountKind::PostCollect => state
                    .collections
                    .iter()
                    .filter(|(_, post_id)| *post_id == entity_id)
                    .count(),
                CountKind::PostComment => state
                    .comments
                    .values()
                    .filter(|comment| {
                        comment.post_id == entity_id
                            && !comment.is_deleted
                            && comment.status == ContentStatus::Published
                    })
                    .count(),
                CountKind::PostView => state
                    .views
                    .iter()
                    .filter(|(_, post_id)| *post_id == entity_id)
                    .count(),
                CountKind::CommentLike => state
                    .comment_likes
                    .iter()
                    .filter(|(_, comment_id)| *comment_id == entity_id)
                    .count(),
                CountKind::UserFollower => state
                    .follows
                    .keys()
                    .filter(|(_, following)| *following == entity_id)
                    .count(),
                CountKind::UserFollowing => state
                    .follows
                    .keys()
                    .filter(|(follower, _)| *follower == entity_id)
                    .count(),
            };
            Ok(count as i64)
        })
    }

    fn update_post_counts(
        &self,
        post_id: u64,
        totals: &MetricTotals,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let totals = *totals;
        Box::pin(async move {
            let mut state = inner.write().await;
            if let Some(post) = state.posts.get_mut(&post_id) {
                post.likes_count = totals.likes;
                post.collects_count = totals.collects;
                post.comments_count = totals.comments;
                post.views_count = totals.views;
            }
            Ok(())
        })
    }

    fn update_comment_likes(
        &self,
        comment_id: u64,
        likes: i64,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .write()
                .await
                .comment_like_counts
                .insert(comment_id, likes);
            Ok(())
        })
    }

    fn update_follow_counts(
        &self,
        user_id: u64,
        followers: i64,
        following: i64,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let profile = state.profiles.entry(user_id).or_insert_with(|| UserProfile {
                user_id,
                ..UserProfile::default()
            });
            profile.followers_count = followers;
            profile.following_count = following;
            Ok(())
        })
    }

    fn post_authors(&self, post_ids: &[u64]) -> BoxFuture<'_, DomainResult<Vec<(u64, u64)>>> {
        let inner = self.inner.clone();
        let post_ids = post_ids.to_vec();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(post_ids
                .into_iter()
                .filter_map(|post_id| {
                    state
                        .posts
                        .get(&post_id)
                        .map(|post| (post_id, post.author_id))
                })
                .collect())
        })
    }

    fn author_totals(&self, user_id: u64) -> BoxFuture<'_, DomainResult<MetricTotals>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .posts
                .values()
                .filter(|post| post.author_id == user_id && !post.is_deleted)
                .fold(MetricTotals::default(), |mut totals, post| {
                    totals.likes += post.likes_count;
                    totals.collects += post.collects_count;
                    totals.comments += post.comments_count;
                    totals.views += post.views_count;
                    totals
                }))
        })
    }

    fn recent_edges(
        &self,
        user_id: u64,
        direction: FollowDirection,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<(u64, i64)>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            let mut edges: Vec<(u64, i64)> = state
                .follows
                .iter()
                .filter_map(|((follower, following), created_at)| match direction {
                    FollowDirection::Followers if *following == user_id => {
                        Some((*follower, *created_at))
                    }
                    FollowDirection::Following if *follower == user_id => {
                        Some((*following, *created_at))
                    }
                    _ => None,
                })
                .collect();
            edges.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
            edges.truncate(limit);
            Ok(edges)
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryMetricRepository {
    inner: Arc<RwLock<BTreeMap<(MetricSeries, u64, Date), MetricTotals>>>,
}

impl InMemoryMetricRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricRepository for InMemoryMetricRepository {
    fn upsert_snapshot(
        &self,
        series: MetricSeries,
        snapshot: &DailySnapshot,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let snapshot = *snapshot;
        Box::pin(async move {
            inner
                .write()
                .await
                .insert((series, snapshot.owner_id, snapshot.date), snapshot.totals);
            Ok(())
        })
    }

    fn list_snapshots(
        &self,
        series: MetricSeries,
        owner_id: u64,
        from: Date,
        to: Date,
    ) -> BoxFuture<'_, DomainResult<Vec<DailySnapshot>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if from > to {
                return Ok(Vec::new());
            }
            let rows = inner.read().await;
            Ok(rows
                .range((series, owner_id, from)..=(series, owner_id, to))
                .map(|((_, owner_id, date), totals)| DailySnapshot {
                    owner_id: *owner_id,
                    date: *date,
                    totals: *totals,
                })
                .collect())
        })
    }

    fn latest_before(
        &self,
        series: MetricSeries,
        owner_id: u64,
        before: Date,
    ) -> BoxFuture<'_, DomainResult<Option<DailySnapshot>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let rows = inner.read().await;
            Ok(rows
                .range((series, owner_id, Date::MIN)..(series, owner_id, before))
                .next_back()
                .map(|((_, owner_id, date), totals)| DailySnapshot {
                    owner_id: *owner_id,
                    date: *date,
                    totals: *totals,
                }))
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryInterestRepository {
    inner: Arc<RwLock<HashMap<u64, InterestSnapshot>>>,
}

impl InMemoryInterestRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InterestRepository for InMemoryInterestRepository {
    fn get(&self, user_id: u64) -> BoxFuture<'_, DomainResult<Option<InterestSnapshot>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.get(&user_id).cloned()) })
    }

    fn save(&self, snapshot: &InterestSnapshot) -> BoxFuture<'_, DomainResult<()>> {
        let inner = self.inner.clone();
        let snapshot = snapshot.clone();
        Box::pin(async move {
            inner.write().await.insert(snapshot.user_id, snapshot);
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct SearchState {
    posts: HashMap<u64, (i64, PostDocument)>,
    users: HashMap<u64, (i64, UserDocument)>,
}

/// External-version semantics: a write lands only with a strictly greater version.
#[derive(Clone, Default)]
pub struct InMemorySearchIndex {
    inner: Arc<RwLock<SearchState>>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn post_version(&self, post_id: u64) -> Option<i64> {
        self.inner
            .read()
            .await
            .posts
            .get(&post_id)
            .map(|(version, _)| *version)
    }

    pub async fn user(&self, user_id: u64) -> Option<UserDocument> {
        self.inner
            .read()
            .await
            .users
            .get(&user_id)
            .map(|(_, document)| document.clone())
    }
}

impl SearchIndex for InMemorySearchIndex {
    fn upsert_post(
        &self,
        document: &PostDocument,
        version: i64,
    ) -> BoxFuture<'_, DomainResult<IndexWrite>> {
        let inner = self.inner.clone();
        let document = document.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if let Some((current, _)) = state.posts.get(&document.id) {
                if *current >= version {
                    return Ok(IndexWrite::Stale);
                }
            }
            state.posts.insert(document.id, (version, document));
            Ok(IndexWrite::Applied)
        })
    }

    fn delete_post(&self, post_id: u64) -> BoxFuture<'_, DomainResult<IndexWrite>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            match inner.write().await.posts.remove(&post_id) {
                Some(_) => Ok(IndexWrite::Applied),
                None => Ok(IndexWrite::Absent),
            }
        })
    }

    fn get_post(&self, post_id: u64) -> BoxFuture<'_, DomainResult<Option<PostDocument>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .posts
                .get(&post_id)
                .map(|(_, document)| document.clone()))
        })
    }

    fn upsert_user(
        &self,
        document: &UserDocument,
        version: i64,
    ) -> BoxFuture<'_, DomainResult<IndexWrite>> {
        let inner = self.inner.clone();
        let document = document.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if let Some((current, _)) = state.users.get(&document.user_id) {
                if *current >= version {
                    return Ok(IndexWrite::Stale);
                }
            }
            state.users.insert(document.user_id, (version, document));
            Ok(IndexWrite::Applied)
        })
    }

    fn update_author_profile(
        &self,
        author_id: u64,
        nickname: &str,
        avatar_url: &str,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let inner = self.inner.clone();
        let nickname = nickname.to_string();
        let avatar_url = avatar_url.to_string();
        Box::pin(async move {
            let mut state = inner.write().await;
            let mut touched = 0;
            for (_, document) in state.posts.values_mut() {
                if document.author_id == author_id {
                    document.author_nickname = nickname.clone();
                    document.author_avatar = avatar_url.clone();
                    touched += 1;
                }
            }
            Ok(touched)
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationRepository {
    inner: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Notification> {
        self.inner.read().await.clone()
    }
}

impl NotificationRepository for InMemoryNotificationRepository {
    fn create(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<Notification>> {
        let inner = self.inner.clone();
        let notification = notification.clone();
        Box::pin(async move {
            let mut rows = inner.write().await;
            if rows
                .iter()
                .any(|row| row.notification_id == notification.notification_id)
            {
                return Err(DomainError::Conflict);
            }
            rows.push(notification.clone());
            Ok(notification)
        })
    }

    fn list(
        &self,
        query: &NotificationListQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<Notification>>> {
        let inner = self.inner.clone();
        let query = query.clone();
        Box::pin(async move {
            let rows = inner.read().await;
            let mut mine: Vec<Notification> = rows
                .iter()
                .filter(|row| row.receiver_id == query.receiver_id)
                .cloned()
                .collect();
            mine.sort_by(|a, b| {
                b.created_at_ms
                    .cmp(&a.created_at_ms)
                    .then_with(|| b.notification_id.cmp(&a.notification_id))
            });
            Ok(mine
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .collect())
        })
    }

    fn unread_count(&self, receiver_id: u64) -> BoxFuture<'_, DomainResult<u64>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .iter()
                .filter(|row| row.receiver_id == receiver_id && !row.is_read)
                .count() as u64)
        })
    }

    fn mark_read(
        &self,
        receiver_id: u64,
        notification_id: &str,
    ) -> BoxFuture<'_, DomainResult<Notification>> {
        let inner = self.inner.clone();
        let notification_id = notification_id.to_string();
        Box::pin(async move {
            let mut rows = inner.write().await;
            let row = rows
                .iter_mut()
                .find(|row| {
                    row.notification_id == notification_id && row.receiver_id == receiver_id
                })
                .ok_or(DomainError::NotFound)?;
            row.is_read = true;
            Ok(row.clone())
        })
    }

    fn mark_all_read(&self, receiver_id: u64) -> BoxFuture<'_, DomainResult<u64>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut rows = inner.write().await;
            let mut updated = 0;
            for row in rows
                .iter_mut()
                .filter(|row| row.receiver_id == receiver_id && !row.is_read)
            {
                row.is_read = true;
                updated += 1;
            }
            Ok(updated)
        })
    }
}

#[derive(Default)]
struct LogState {
    queue: VecDeque<LogMessage>,
    next_offset: HashMap<i32, i64>,
    commits: Vec<Vec<Checkpoint>>,
    closed: bool,
}

/// One topic of a partitioned log. Clones share the same queue.
#[derive(Clone)]
pub struct InMemoryLog {
    topic: String,
    state: Arc<Mutex<LogState>>,
    ready: Arc<Notify>,
}

impl InMemoryLog {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: Arc::new(Mutex::new(LogState::default())),
            ready: Arc::new(Notify::new()),
        }
    }

    /// Appends a payload to `partition` and returns its offset.
    pub async fn publish(&self, partition: i32, key: Option<String>, payload: Vec<u8>) -> i64 {
        let offset = {
            let mut state = self.state.lock().await;
            let next = state.next_offset.entry(partition).or_insert(0);
            let offset = *next;
            *next += 1;
            state.queue.push_back(LogMessage {
                topic: self.topic.clone(),
                partition,
                offset,
                key,
                payload,
            });
            offset
        };
        self.ready.notify_one();
        offset
    }

    /// Readers drain what is queued and then see the end of the stream.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.ready.notify_one();
    }

    pub async fn commits(&self) -> Vec<Vec<Checkpoint>> {
        self.state.lock().await.commits.clone()
    }
}

impl MessageSource for InMemoryLog {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn next_message(&mut self) -> BoxFuture<'_, Result<Option<LogMessage>, LogError>> {
        let state = self.state.clone();
        let ready = self.ready.clone();
        Box::pin(async move {
            loop {
                {
                    let mut state = state.lock().await;
                    if let Some(message) = state.queue.pop_front() {
                        return Ok(Some(message));
                    }
                    if state.closed {
                        return Ok(None);
                    }
                }
                ready.notified().await;
            }
        })
    }

    fn commit(&mut self, checkpoints: Vec<Checkpoint>) -> BoxFuture<'_, Result<(), LogError>> {
        let state = self.state.clone();
        Box::pin(async move {
            state.lock().await.commits.push(checkpoints);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_moves_members_aside_and_merges_leftovers() {
        let kv = InMemoryKv::new();
        kv.mark("dirty:post", &["1".into(), "2".into()]).await.unwrap();
        assert_eq!(kv.drain("dirty:post").await.unwrap(), vec!["1", "2"]);

        kv.mark("dirty:post", &["3".into()]).await.unwrap();
        let merged = kv.drain("dirty:post").await.unwrap();
        assert_eq!(merged, vec!["1", "2", "3"]);

        kv.complete_drain("dirty:post").await.unwrap();
        assert!(kv.drain("dirty:post").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trim_keeps_highest_scores() {
        let kv = InMemoryKv::new();
        let mut ops: Vec<KvOp> = (0..5)
            .map(|score| KvOp::SortedAdd {
                key: "z".into(),
                member: format!("m{score}"),
                score,
            })
            .collect();
        ops.push(KvOp::SortedTrim {
            key: "z".into(),
            keep: 2,
        });
        kv.execute(ops).await.unwrap();
        assert_eq!(
            kv.sorted_members("z").await,
            vec![("m4".to_string(), 4), ("m3".to_string(), 3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let kv = InMemoryKv::new();
        CacheStore::put(&kv, "k", "v", Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(CacheStore::get(&kv, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_index_versions_are_ignored() {
        let index = InMemorySearchIndex::new();
        let document = PostDocument {
            id: 1,
            title: "new".into(),
            ..PostDocument::default()
        };
        assert_eq!(
            index.upsert_post(&document, 1700).await.unwrap(),
            IndexWrite::Applied
        );
        let older = PostDocument {
            title: "old".into(),
            ..document.clone()
        };
        assert_eq!(
            index.upsert_post(&older, 1600).await.unwrap(),
            IndexWrite::Stale
        );
        assert_eq!(index.get_post(1).await.unwrap().unwrap().title, "new");
        assert_eq!(index.delete_post(2).await.unwrap(), IndexWrite::Absent);
    }
}
