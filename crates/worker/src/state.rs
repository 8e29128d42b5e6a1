use std::sync::Arc;

use cornerstone_domain::counters::CounterService;
use cornerstone_domain::follows::FollowCacheWriter;
use cornerstone_domain::handlers::PipelineServices;
use cornerstone_domain::indexing::IndexWriter;
use cornerstone_domain::interests::InterestRecorder;
use cornerstone_domain::locks::LockManager;
use cornerstone_domain::memory::{
    InMemoryContentStore, InMemoryInterestRepository, InMemoryKv, InMemoryMetricRepository,
    InMemoryNotificationRepository, InMemorySearchIndex,
};
use cornerstone_domain::metrics::TrendService;
use cornerstone_domain::moderation::{ContentModerator, ModelSuite};
use cornerstone_domain::notifications::NotificationService;
use cornerstone_domain::ports::db::DbAdapter;
use cornerstone_domain::ports::kv::{
    CacheStore, CounterStore, DirtySetStore, DistributedLock, KvPipeline, Publisher,
    SortedSetStore,
};
use cornerstone_domain::ports::notifications::NotificationRepository;
use cornerstone_domain::ports::search::SearchIndex;
use cornerstone_domain::ports::store::{
    ContentRepository, CountRepository, InterestRepository, MetricRepository,
};
use cornerstone_domain::reconcile::ReconcileJobs;
use cornerstone_infra::config::AppConfig;
use cornerstone_infra::db::{DbConfig, EndpointProbe, MysqlAdapter, SurrealAdapter, connect_mysql};
use cornerstone_infra::kv::RedisKv;
use cornerstone_infra::llm::OpenAiClient;
use cornerstone_infra::media::{BinaryPaths, FfmpegToolkit, WhisperTranscriber};
use cornerstone_infra::mysql::MysqlStore;
use cornerstone_infra::notifications::SurrealNotificationRepository;
use cornerstone_infra::search::ElasticsearchIndex;
use cornerstone_infra::storage::HttpTempStorage;

/// Every store the pipeline writes through, one handle per role.
struct Backends {
    pipeline: Arc<dyn KvPipeline>,
    counters: Arc<dyn CounterStore>,
    dirty: Arc<dyn DirtySetStore>,
    sorted: Arc<dyn SortedSetStore>,
    cache: Arc<dyn CacheStore>,
    lock: Arc<dyn DistributedLock>,
    publisher: Arc<dyn Publisher>,
    content: Arc<dyn ContentRepository>,
    truth: Arc<dyn CountRepository>,
    metrics: Arc<dyn MetricRepository>,
    interests: Arc<dyn InterestRepository>,
    index: Arc<dyn SearchIndex>,
    notifications: Arc<dyn NotificationRepository>,
}

impl Backends {
    fn with_kv<K>(
        kv: Arc<K>,
        content: Arc<dyn ContentRepository>,
        truth: Arc<dyn CountRepository>,
        metrics: Arc<dyn MetricRepository>,
        interests: Arc<dyn InterestRepository>,
        index: Arc<dyn SearchIndex>,
        notifications: Arc<dyn NotificationRepository>,
    ) -> Self
    where
        K: KvPipeline
            + CounterStore
            + DirtySetStore
            + SortedSetStore
            + CacheStore
            + DistributedLock
            + Publisher
            + 'static,
    {
        Self {
            pipeline: kv.clone(),
            counters: kv.clone(),
            dirty: kv.clone(),
            sorted: kv.clone(),
            cache: kv.clone(),
            lock: kv.clone(),
            publisher: kv,
            content,
            truth,
            metrics,
            interests,
            index,
            notifications,
        }
    }

    fn memory() -> Self {
        let content = Arc::new(InMemoryContentStore::new());
        Self::with_kv(
            Arc::new(InMemoryKv::new()),
            content.clone(),
            content,
            Arc::new(InMemoryMetricRepository::new()),
            Arc::new(InMemoryInterestRepository::new()),
            Arc::new(InMemorySearchIndex::new()),
            Arc::new(InMemoryNotificationRepository::new()),
        )
    }

    async fn live(config: &AppConfig) -> anyhow::Result<(Self, Vec<Arc<dyn DbAdapter>>)> {
        let kv = Arc::new(RedisKv::connect(&config.redis_url).await?);
        let pool = connect_mysql(config).await?;
        let store = Arc::new(MysqlStore::new(pool.clone()));
        let surreal_config = DbConfig::from_app_config(config);
        let surreal = surreal_config.connect().await?;
        let index = ElasticsearchIndex::new(&config.elasticsearch_url, config.index_names());

        let checks: Vec<Arc<dyn DbAdapter>> = vec![
            Arc::new(MysqlAdapter::new(pool)),
            Arc::new(SurrealAdapter::new(surreal_config)),
            Arc::new(EndpointProbe::new(
                "elasticsearch",
                config.elasticsearch_url.clone(),
                9200,
            )),
        ];

        let backends = Self::with_kv(
            kv,
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            Arc::new(index),
            Arc::new(SurrealNotificationRepository::with_client(surreal)),
        );
        Ok((backends, checks))
    }
}

fn model_suite(config: &AppConfig) -> ModelSuite {
    let client = Arc::new(OpenAiClient::from_config(config));
    let paths = BinaryPaths::from_config(config);
    ModelSuite {
        text: client.clone(),
        vision: client.clone(),
        embedding: client,
        media: Arc::new(FfmpegToolkit::new(paths.clone())),
        storage: Arc::new(HttpTempStorage::from_config(config)),
        transcriber: Arc::new(WhisperTranscriber::new(paths)),
    }
}

#[derive(Clone)]
pub struct WorkerState {
    pub services: PipelineServices,
    pub jobs: ReconcileJobs,
    pub health: Vec<Arc<dyn DbAdapter>>,
}

impl WorkerState {
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let (backends, health) = if config.is_memory_backend() {
            (Backends::memory(), Vec::new())
        } else {
            Backends::live(config).await?
        };
        Ok(Self::assemble(config, backends, health))
    }

    fn assemble(config: &AppConfig, backends: Backends, health: Vec<Arc<dyn DbAdapter>>) -> Self {
        let locks = LockManager::new(backends.lock.clone());
        let counters = CounterService::new(
            backends.counters.clone(),
            backends.dirty.clone(),
            backends.pipeline.clone(),
            backends.truth.clone(),
        );
        let follows = FollowCacheWriter::new(
            backends.pipeline.clone(),
            backends.sorted.clone(),
            backends.truth.clone(),
        );
        let notifications = NotificationService::new(
            backends.notifications.clone(),
            backends.content.clone(),
            backends.publisher.clone(),
        );
        let moderator = ContentModerator::new(
            model_suite(config),
            config.model_limits(),
            config.moderation_config(),
        );
        let index = IndexWriter::new(
            backends.index.clone(),
            backends.content.clone(),
            locks.clone(),
        );
        let interests = InterestRecorder::new(
            backends.pipeline.clone(),
            backends.sorted.clone(),
            backends.interests.clone(),
            backends.content.clone(),
            locks.clone(),
        );
        let trends = TrendService::new(
            backends.metrics.clone(),
            backends.cache.clone(),
            backends.content.clone(),
        );
        let jobs = ReconcileJobs::new(
            counters.clone(),
            backends.truth.clone(),
            backends.metrics.clone(),
            trends,
            interests.clone(),
            locks,
        );

        Self {
            services: PipelineServices {
                content: backends.content,
                counters,
                follows,
                notifications,
                moderator,
                index,
                interests,
            },
            jobs,
            health,
        }
    }

    /// Fails on the first dependency that does not answer.
    pub async fn check_health(&self) -> anyhow::Result<()> {
        for adapter in &self.health {
            adapter
                .health_check()
                .await
                .map_err(|err| anyhow::anyhow!("{} health check failed: {err}", adapter.name()))?;
            tracing::info!(dependency = adapter.name(), "dependency reachable");
        }
        Ok(())
    }
}
