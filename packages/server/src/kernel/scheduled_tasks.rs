//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! This module provides periodic maintenance that runs beside the worker loop:
//! - Daily retention cleanup of completed jobs
//!
//! # Architecture
//!
//! Scheduled tasks run independently of the job queue loop and go through the
//! same [`QueueManager`] as everything else.
//!
//! ```text
//! Scheduler (daily, 03:00)
//!     │
//!     └─► QueueManager::clean_completed_jobs(retention_days)
//! ```

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::kernel::jobs::QueueManager;

/// Every day at 03:00 (sec min hour day month weekday).
const RETENTION_SCHEDULE: &str = "0 0 3 * * *";

/// Start all scheduled tasks
pub async fn start_scheduler(queue: QueueManager, retention_days: i64) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let retention_job = Job::new_async(RETENTION_SCHEDULE, move |_uuid, _lock| {
        let queue = queue.clone();
        Box::pin(async move {
            if let Err(e) = run_retention_cleanup(&queue, retention_days).await {
                tracing::error!("Retention cleanup task failed: {}", e);
            }
        })
    })?;

    scheduler.add(retention_job).await?;
    scheduler.start().await?;

    tracing::info!(
        retention_days,
        "Scheduled tasks started (retention cleanup daily at 03:00)"
    );
    Ok(scheduler)
}

/// Delete completed jobs older than `retention_days`.
///
/// Queued and errored jobs are never removed.
pub async fn run_retention_cleanup(queue: &QueueManager, retention_days: i64) -> Result<u64> {
    tracing::info!("Running retention cleanup task");

    let deleted = queue.clean_completed_jobs(retention_days).await?;

    tracing::info!(
        "Retention cleanup complete: deleted {} completed jobs older than {} days",
        deleted,
        retention_days
    );

    Ok(deleted)
}
