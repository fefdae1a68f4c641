//! Operator CLI for the generation job queue
//!
//! Inspects and repairs jobs in the Postgres job store. Every command prints
//! one JSON object. It never creates jobs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docsmith_core::config::Config;
use docsmith_core::kernel::jobs::{
    Job, JobStatus, PostgresJobStore, QueueConfig, QueueManager, QueueStats,
};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "jobctl")]
#[command(about = "Inspect and manage generation jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show one job
    Status { job_id: Uuid },

    /// List a user's jobs, newest first
    List {
        #[arg(long)]
        user: Uuid,
        /// queued, in_progress, completed or errored
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Return an errored job to the queue
    Resubmit { job_id: Uuid },

    /// Delete completed jobs older than the retention window
    Clean {
        /// Defaults to RETENTION_DAYS
        #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
        days: Option<i64>,
    },

    /// Job counts per status
    Stats,
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize, Default)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<Job>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jobs: Option<Vec<Job>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<QueueStats>,
}

impl Response {
    fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

fn output(resp: Response) -> Result<()> {
    println!("{}", serde_json::to_string(&resp)?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let queue = connect(&config).await?;

    match cli.command {
        Commands::Status { job_id } => cmd_status(&queue, job_id).await,
        Commands::List {
            user,
            status,
            limit,
        } => cmd_list(&queue, user, status, limit).await,
        Commands::Resubmit { job_id } => cmd_resubmit(&queue, job_id).await,
        Commands::Clean { days } => {
            cmd_clean(&queue, days.unwrap_or(config.retention_days)).await
        }
        Commands::Stats => cmd_stats(&queue).await,
    }
}

async fn connect(config: &Config) -> Result<QueueManager> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for jobctl")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    Ok(QueueManager::new(
        Arc::new(PostgresJobStore::new(pool)),
        QueueConfig {
            max_parallel_jobs: config.max_parallel_jobs as i64,
            ..QueueConfig::default()
        },
    ))
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_status(queue: &QueueManager, job_id: Uuid) -> Result<()> {
    match queue.get_job_status(job_id).await? {
        Some(job) => output(Response {
            job: Some(job),
            ..Response::ok()
        }),
        None => output(Response::failed(format!("Job {} not found", job_id))),
    }
}

async fn cmd_list(
    queue: &QueueManager,
    user_id: Uuid,
    status: Option<JobStatus>,
    limit: i64,
) -> Result<()> {
    let jobs = queue.get_user_jobs(user_id, limit, status).await?;
    output(Response {
        jobs: Some(jobs),
        ..Response::ok()
    })
}

async fn cmd_resubmit(queue: &QueueManager, job_id: Uuid) -> Result<()> {
    match queue.resubmit_job(job_id).await {
        Ok(()) => output(Response {
            message: Some(format!("Job {} queued", job_id)),
            ..Response::ok()
        }),
        Err(e) => output(Response::failed(e.to_string())),
    }
}

async fn cmd_clean(queue: &QueueManager, days: i64) -> Result<()> {
    let deleted = queue.clean_completed_jobs(days).await?;
    output(Response {
        deleted: Some(deleted),
        ..Response::ok()
    })
}

async fn cmd_stats(queue: &QueueManager) -> Result<()> {
    let stats = queue.queue_stats().await?;
    output(Response {
        stats: Some(stats),
        ..Response::ok()
    })
}
