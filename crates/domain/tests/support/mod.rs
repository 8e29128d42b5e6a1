#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cornerstone_domain::DomainResult;
use cornerstone_domain::cdc::{MutationEvent, Op, Row};
use cornerstone_domain::content::{ContentStatus, Post, UserProfile};
use cornerstone_domain::counters::CounterService;
use cornerstone_domain::dispatch::EventHandler;
use cornerstone_domain::follows::FollowCacheWriter;
use cornerstone_domain::handlers::{CdcTable, PipelineServices, TableHandler};
use cornerstone_domain::indexing::IndexWriter;
use cornerstone_domain::interests::InterestRecorder;
use cornerstone_domain::locks::LockManager;
use cornerstone_domain::memory::{
    InMemoryContentStore, InMemoryInterestRepository, InMemoryKv, InMemoryMetricRepository,
    InMemoryNotificationRepository, InMemorySearchIndex,
};
use cornerstone_domain::metrics::TrendService;
use cornerstone_domain::moderation::{
    ContentModerator, ModelLimits, ModelSuite, ModerationConfig,
};
use cornerstone_domain::notifications::NotificationService;
use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::models::{
    ChatReply, EmbeddingModel, MediaToolkit, TempStorage, TextModel, Transcriber, VisionModel,
};
use cornerstone_domain::reconcile::ReconcileJobs;
use tokio_util::sync::CancellationToken;

const PASS_REPLY: &str =
    r#"{"status":"1","main_tag":"technology","tags":["rust"],"summary":"a post"}"#;
const DENY_REPLY: &str = r#"{"status":"3"}"#;
const AGGREGATE_REPLY: &str = r#"{"main_tag":"technology","tags":["rust","async"]}"#;

/// Denies any text containing "forbidden"; passes everything else.
#[derive(Default)]
pub struct ScriptedText {
    pub calls: AtomicUsize,
}

impl TextModel for ScriptedText {
    fn complete(&self, system: &str, user: &str) -> BoxFuture<'_, DomainResult<ChatReply>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = if system.starts_with("Merge") {
            AGGREGATE_REPLY
        } else if user.contains("forbidden") {
            DENY_REPLY
        } else {
            PASS_REPLY
        };
        Box::pin(async move {
            Ok(ChatReply {
                content: content.to_string(),
                finish_reason: Some("stop".to_string()),
            })
        })
    }
}

/// Denies at once when a URL contains "deny"; otherwise answers after `delay`.
pub struct ScriptedVision {
    pub delay: Duration,
    pub started: AtomicUsize,
    pub completed: AtomicUsize,
}

impl ScriptedVision {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }
}

impl VisionModel for ScriptedVision {
    fn complete_with_images(
        &self,
        _system: &str,
        _prompt: &str,
        image_urls: &[String],
    ) -> BoxFuture<'_, DomainResult<ChatReply>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let deny = image_urls.iter().any(|url| url.contains("deny"));
        Box::pin(async move {
            if !deny {
                tokio::time::sleep(self.delay).await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(ChatReply {
                content: if deny { DENY_REPLY } else { PASS_REPLY }.to_string(),
                finish_reason: None,
            })
        })
    }
}

pub struct FixedEmbedding;

impl EmbeddingModel for FixedEmbedding {
    fn embed(&self, _text: &str) -> BoxFuture<'_, DomainResult<Vec<f32>>> {
        Box::pin(async { Ok(vec![0.25, 0.5, 0.25]) })
    }
}

pub struct StubMedia;

impl MediaToolkit for StubMedia {
    fn probe_duration(&self, _url: &str) -> BoxFuture<'_, DomainResult<f64>> {
        Box::pin(async { Ok(12.0) })
    }

    fn extract_frames(
        &self,
        _url: &str,
        _duration: f64,
        count: u32,
        _width: u32,
    ) -> BoxFuture<'_, DomainResult<Vec<Vec<u8>>>> {
        Box::pin(async move { Ok((0..count).map(|frame| vec![frame as u8]).collect()) })
    }

    fn extract_audio(&self, _url: &str) -> BoxFuture<'_, DomainResult<Vec<u8>>> {
        Box::pin(async { Ok(b"RIFF".to_vec()) })
    }
}

pub struct EchoStorage;

impl TempStorage for EchoStorage {
    fn upload(
        &self,
        object_key: &str,
        _content_type: &str,
        _bytes: Vec<u8>,
    ) -> BoxFuture<'_, DomainResult<String>> {
        let url = format!("https://temp.example.com/{object_key}");
        Box::pin(async move { Ok(url) })
    }
}

pub struct FixedTranscript(pub String);

impl Transcriber for FixedTranscript {
    fn transcribe(&self, _url: &str) -> BoxFuture<'_, DomainResult<String>> {
        let transcript = self.0.clone();
        Box::pin(async move { Ok(transcript) })
    }
}

pub struct Harness {
    pub kv: InMemoryKv,
    pub content: InMemoryContentStore,
    pub metrics: InMemoryMetricRepository,
    pub interest_store: InMemoryInterestRepository,
    pub index: InMemorySearchIndex,
    pub notifications: InMemoryNotificationRepository,
    pub text: Arc<ScriptedText>,
    pub vision: Arc<ScriptedVision>,
    pub services: PipelineServices,
    pub trends: TrendService,
    pub jobs: ReconcileJobs,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_moderation(ModerationConfig::default(), Duration::ZERO)
    }

    pub fn with_moderation(config: ModerationConfig, vision_delay: Duration) -> Self {
        let kv = InMemoryKv::new();
        let content = InMemoryContentStore::new();
        let metrics = InMemoryMetricRepository::new();
        let interest_store = InMemoryInterestRepository::new();
        let index = InMemorySearchIndex::new();
        let notifications = InMemoryNotificationRepository::new();
        let text = Arc::new(ScriptedText::default());
        let vision = Arc::new(ScriptedVision::new(vision_delay));

        let kv_arc = Arc::new(kv.clone());
        let content_arc = Arc::new(content.clone());
        let locks = LockManager::new(kv_arc.clone());
        let counters = CounterService::new(
            kv_arc.clone(),
            kv_arc.clone(),
            kv_arc.clone(),
            content_arc.clone(),
        );
        let follows = FollowCacheWriter::new(kv_arc.clone(), kv_arc.clone(), content_arc.clone());
        let notification_service = NotificationService::new(
            Arc::new(notifications.clone()),
            content_arc.clone(),
            kv_arc.clone(),
        );
        let moderator = ContentModerator::new(
            ModelSuite {
                text: text.clone(),
                vision: vision.clone(),
                embedding: Arc::new(FixedEmbedding),
                media: Arc::new(StubMedia),
                storage: Arc::new(EchoStorage),
                transcriber: Arc::new(FixedTranscript(String::new())),
            },
            ModelLimits::default(),
            config,
        );
        let index_writer = IndexWriter::new(
            Arc::new(index.clone()),
            content_arc.clone(),
            locks.clone(),
        );
        let interests = InterestRecorder::new(
            kv_arc.clone(),
            kv_arc.clone(),
            Arc::new(interest_store.clone()),
            content_arc.clone(),
            locks.clone(),
        );
        let trends = TrendService::new(
            Arc::new(metrics.clone()),
            kv_arc.clone(),
            content_arc.clone(),
        );
        let jobs = ReconcileJobs::new(
            counters.clone(),
            content_arc.clone(),
            Arc::new(metrics.clone()),
            trends.clone(),
            interests.clone(),
            locks,
        );
        let services = PipelineServices {
            content: content_arc,
            counters,
            follows,
            notifications: notification_service,
            moderator,
            index: index_writer,
            interests,
        };

        Self {
            kv,
            content,
            metrics,
            interest_store,
            index,
            notifications,
            text,
            vision,
            services,
            trends,
            jobs,
            cancel: CancellationToken::new(),
        }
    }

    pub fn handler(&self, table: CdcTable) -> TableHandler {
        TableHandler::new(table, self.services.clone())
    }

    pub async fn apply(&self, table: CdcTable, event: MutationEvent) -> DomainResult<()> {
        let handler = self.handler(table);
        handler.handle(&event, &self.cancel).await
    }

    pub async fn seed_post(&self, id: u64, author_id: u64) -> Post {
        let post = post(id, author_id);
        self.content.insert_post(post.clone()).await;
        self.content
            .insert_profile(UserProfile {
                user_id: author_id,
                nickname: format!("user{author_id}"),
                ..UserProfile::default()
            })
            .await;
        post
    }
}

pub fn post(id: u64, author_id: u64) -> Post {
    Post {
        id,
        author_id,
        title: format!("post {id}"),
        content: "learning #rust".to_string(),
        status: ContentStatus::Audit,
        is_deleted: false,
        content_version: 1,
        likes_count: 0,
        comments_count: 0,
        collects_count: 0,
        views_count: 0,
        created_at: 1_735_689_600,
        updated_at: 1_735_689_600,
    }
}

pub fn row<const N: usize>(pairs: [(&str, &str); N]) -> Row {
    Row::from_pairs(pairs)
}

pub fn event<const N: usize>(table: CdcTable, op: Op, pairs: [(&str, &str); N], ts: i64) -> MutationEvent {
    MutationEvent::new(table.name(), op, row(pairs), ts)
}
