//! Generation Worker
//!
//! This binary polls the job queue and runs document generation jobs until
//! it receives SIGINT or SIGTERM, then drains running jobs and exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use docsmith_core::config::Config;
use docsmith_core::domains::generation::{GenerationPipeline, PipelineConfig};
use docsmith_core::kernel::jobs::{
    JobType, ProcessorRegistry, QueueConfig, QueueManager, Worker, WorkerConfig,
};
use docsmith_core::kernel::scheduled_tasks::start_scheduler;
use docsmith_core::kernel::{create_job_store, ServerDeps};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Run the document generation worker")]
struct Cli {
    /// Overrides WORKER_ID
    #[arg(long)]
    worker_id: Option<String>,

    /// Overrides MAX_PARALLEL_JOBS
    #[arg(long)]
    max_parallel_jobs: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,docsmith_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(worker_id) = cli.worker_id {
        config.worker_id = worker_id;
    }
    if let Some(max_parallel_jobs) = cli.max_parallel_jobs {
        anyhow::ensure!(max_parallel_jobs >= 1, "--max-parallel-jobs must be at least 1");
        config.max_parallel_jobs = max_parallel_jobs;
    }

    tracing::info!(
        worker_id = %config.worker_id,
        max_parallel_jobs = config.max_parallel_jobs,
        "Starting generation worker"
    );

    // Queue
    let store = create_job_store(&config).await?;
    let queue = QueueManager::new(
        store,
        QueueConfig {
            max_parallel_jobs: config.max_parallel_jobs as i64,
            nominal_job_duration: chrono::Duration::from_std(config.nominal_job_duration)
                .context("NOMINAL_JOB_DURATION_SECONDS out of range")?,
        },
    );

    // Collaborators and processors
    let deps = ServerDeps::from_config(&config)?;
    let pipeline_config = PipelineConfig::from_config(&config);
    let mut registry = ProcessorRegistry::new();
    for job_type in [JobType::ResearchPack, JobType::ReviewPaper] {
        let pipeline = GenerationPipeline::new(job_type, deps.clone(), pipeline_config.clone())
            .with_context(|| format!("Failed to build {} pipeline", job_type))?;
        registry.register(job_type, Arc::new(pipeline));
    }
    tracing::info!(job_types = ?registry.registered_types(), "Processors registered");

    let mut scheduler = start_scheduler(queue.clone(), config.retention_days).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let worker = Worker::new(
        queue,
        registry,
        WorkerConfig {
            worker_id: config.worker_id.clone(),
            max_parallel_jobs: config.max_parallel_jobs,
            poll_interval: config.poll_interval,
            shutdown_grace: config.shutdown_grace,
            ..WorkerConfig::default()
        },
    );
    let result = worker.run(shutdown).await;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown failed: {}", e);
    }
    tracing::info!("Worker stopped");
    result
}

/// Cancel `shutdown` on the first SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
