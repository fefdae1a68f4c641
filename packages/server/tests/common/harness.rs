//! Test harnesses for integration testing.
//!
//! [`TestHarness`] runs the queue over the in-memory store with mock
//! collaborators, so most tests need nothing external. [`PostgresHarness`]
//! shares one Postgres container across every test that asks for it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use docsmith_core::domains::generation::{GenerationPipeline, PipelineConfig};
use docsmith_core::kernel::jobs::{
    InMemoryJobStore, JobType, PostgresJobStore, ProcessorRegistry, QueueConfig, QueueManager,
    Worker, WorkerConfig,
};
use docsmith_core::kernel::ServerDeps;
use sqlx::PgPool;
use tempfile::TempDir;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Initialize a tracing subscriber that respects RUST_LOG.
/// Run tests with: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// In-memory harness
// =============================================================================

/// Queue, store and output directory for one test.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let job_id = ctx.queue.submit_job(user_id, job_type, params).await?;
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    pub store: Arc<InMemoryJobStore>,
    pub queue: QueueManager,
    pub output_dir: TempDir,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().expect("Failed to create test harness")
    }

    async fn teardown(self) {
        // Temp dir is removed on drop
    }
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_queue_config(QueueConfig::default())
    }

    pub fn with_queue_config(config: QueueConfig) -> Result<Self> {
        init_tracing();
        let store = Arc::new(InMemoryJobStore::new());
        let queue = QueueManager::new(store.clone(), config);
        let output_dir = tempfile::tempdir().context("Failed to create output dir")?;
        Ok(Self {
            store,
            queue,
            output_dir,
        })
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            output_dir: self.output_dir.path().to_path_buf(),
            bucket: "test-bucket".to_string(),
            ..PipelineConfig::default()
        }
    }

    pub fn pipeline(&self, job_type: JobType, deps: ServerDeps) -> GenerationPipeline {
        GenerationPipeline::new(job_type, deps, self.pipeline_config())
            .expect("Failed to build pipeline")
    }

    /// Registry with both document pipelines over `deps`.
    pub fn generation_registry(&self, deps: ServerDeps) -> ProcessorRegistry {
        ProcessorRegistry::new()
            .with(
                JobType::ResearchPack,
                Arc::new(self.pipeline(JobType::ResearchPack, deps.clone())),
            )
            .with(
                JobType::ReviewPaper,
                Arc::new(self.pipeline(JobType::ReviewPaper, deps)),
            )
    }

    /// A worker that polls fast enough for tests.
    pub fn worker(&self, registry: ProcessorRegistry, config: WorkerConfig) -> Worker {
        Worker::new(self.queue.clone(), registry, config)
    }
}

/// Worker settings tuned for tests: short poll, short grace.
pub fn fast_worker_config(worker_id: &str) -> WorkerConfig {
    WorkerConfig {
        worker_id: worker_id.to_string(),
        poll_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(5),
        stats_interval: Duration::from_secs(3600),
        ..WorkerConfig::default()
    }
}

// =============================================================================
// Postgres harness
// =============================================================================

/// Shared container; started once, reused by every Postgres test.
struct SharedPostgres {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn init() -> Result<Self> {
        init_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        // Run migrations once on the shared database
        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_POSTGRES
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared Postgres")
            })
            .await
    }
}

/// Postgres-backed queue. Tests share one database, so each test should only
/// look at rows it created (filter by its own user id).
pub struct PostgresHarness {
    pub db_pool: PgPool,
    pub store: Arc<PostgresJobStore>,
    pub queue: QueueManager,
}

impl AsyncTestContext for PostgresHarness {
    async fn setup() -> Self {
        Self::new()
            .await
            .expect("Failed to create Postgres harness")
    }

    async fn teardown(self) {
        // Database pool is automatically dropped
    }
}

impl PostgresHarness {
    pub async fn new() -> Result<Self> {
        let shared = SharedPostgres::get().await;
        let db_pool = PgPool::connect(&shared.db_url)
            .await
            .context("Failed to connect to test database")?;
        let store = Arc::new(PostgresJobStore::new(db_pool.clone()));
        let queue = QueueManager::new(store.clone(), QueueConfig::default());
        Ok(Self {
            db_pool,
            store,
            queue,
        })
    }
}
