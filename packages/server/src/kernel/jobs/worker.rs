//! Polling worker that executes generation jobs.
//!
//! The worker is a long-running loop that:
//! - Returns jobs orphaned by a previous run of the same worker id to the queue
//! - Polls the [`QueueManager`] for jobs up to its free capacity
//! - Runs each job on its own task with a progress reporter and cancel token
//! - Settles every outcome as completed, requeued or errored
//!
//! # Architecture
//!
//! ```text
//! Worker
//!     │
//!     ├─► QueueManager::get_next_jobs (atomic claim)
//!     ├─► ProcessorRegistry lookup by job type
//!     ├─► JoinSet task per job
//!     │       ├─► JobProcessor::process(job, ctx)
//!     │       ├─► flush progress writer
//!     │       └─► settle outcome via QueueManager
//!     └─► reap finished tasks every poll
//! ```
//!
//! Every write a job task makes names this worker as the owner, so a job that
//! was released and claimed elsewhere is never settled twice.
//!
//! On shutdown the loop stops claiming and waits for running tasks. If they
//! outlive `shutdown_grace`, their cancel tokens fire; processors then return
//! [`JobOutcome::Interrupted`] and the job goes back to the queue without
//! spending retry budget. Tasks are never aborted.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::job::{Job, JobStatus, DEFAULT_RETRY_BUDGET};
use super::progress::progress_channel;
use super::queue::QueueManager;
use super::registry::{JobOutcome, JobProcessor, ProcessContext, ProcessorRegistry};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Jobs this worker runs at once.
    pub max_parallel_jobs: usize,
    pub poll_interval: Duration,
    /// How long shutdown waits before interrupting running jobs.
    pub shutdown_grace: Duration,
    /// Requeues allowed for transient failures.
    pub retry_budget: i32,
    /// How often queue counts are logged.
    pub stats_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            max_parallel_jobs: 3,
            poll_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(300),
            retry_budget: DEFAULT_RETRY_BUDGET,
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

pub struct Worker {
    queue: QueueManager,
    registry: Arc<ProcessorRegistry>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(queue: QueueManager, registry: ProcessorRegistry, config: WorkerConfig) -> Self {
        Self {
            queue,
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Run until `shutdown` is cancelled and every running job has settled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            max_parallel_jobs = self.config.max_parallel_jobs,
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            "worker starting"
        );

        if let Err(e) = self.queue.release_worker_jobs(&self.config.worker_id).await {
            error!(worker_id = %self.config.worker_id, error = %e, "failed to release orphaned jobs");
        }

        // Not a child of `shutdown`: running jobs are only interrupted once the grace period ends.
        let interrupt = CancellationToken::new();
        let mut tasks: JoinSet<Uuid> = JoinSet::new();

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = tokio::time::interval(self.config.stats_interval);
        stats.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = stats.tick() => {
                    self.log_stats().await;
                    continue;
                }
                _ = poll.tick() => {}
            }

            reap(&mut tasks);

            let available = self.config.max_parallel_jobs.saturating_sub(tasks.len());
            if available == 0 {
                continue;
            }

            let jobs = match self
                .queue
                .get_next_jobs(&self.config.worker_id, Some(available as i64))
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(worker_id = %self.config.worker_id, error = %e, "failed to claim jobs");
                    continue;
                }
            };

            for job in jobs {
                self.dispatch(&mut tasks, job, &interrupt).await;
            }
        }

        self.drain(tasks, interrupt).await;
        info!(worker_id = %self.config.worker_id, "worker stopped");
        Ok(())
    }

    async fn dispatch(&self, tasks: &mut JoinSet<Uuid>, job: Job, interrupt: &CancellationToken) {
        let Some(processor) = self.registry.get(job.job_type) else {
            let message = format!("no processor registered for job type {}", job.job_type);
            error!(job_id = %job.id, job_type = %job.job_type, "{}", message);
            if let Err(e) = self
                .queue
                .update_job_status(
                    job.id,
                    JobStatus::Errored,
                    Some(&self.config.worker_id),
                    None,
                    Some(&message),
                )
                .await
            {
                error!(job_id = %job.id, error = %e, "failed to mark job as errored");
            }
            return;
        };

        debug!(job_id = %job.id, job_type = %job.job_type, "dispatching job");
        let span = info_span!(
            "job",
            job_id = %job.id,
            job_type = %job.job_type,
            worker_id = %self.config.worker_id
        );
        let queue = self.queue.clone();
        let cancel = interrupt.child_token();
        let retry_budget = self.config.retry_budget;
        let worker_id = self.config.worker_id.clone();

        tasks.spawn(
            async move {
                let job_id = job.id;
                run_job(queue, processor, job, cancel, retry_budget, &worker_id).await;
                job_id
            }
            .instrument(span),
        );
    }

    async fn drain(&self, mut tasks: JoinSet<Uuid>, interrupt: CancellationToken) {
        if tasks.is_empty() {
            return;
        }
        info!(
            worker_id = %self.config.worker_id,
            running = tasks.len(),
            grace_secs = self.config.shutdown_grace.as_secs(),
            "waiting for running jobs"
        );

        let deadline = tokio::time::sleep(self.config.shutdown_grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(result) => log_join(result),
                    None => break,
                },
                _ = &mut deadline, if !interrupt.is_cancelled() => {
                    warn!(
                        worker_id = %self.config.worker_id,
                        running = tasks.len(),
                        "shutdown grace elapsed, interrupting running jobs"
                    );
                    interrupt.cancel();
                }
            }
        }
    }

    async fn log_stats(&self) {
        match self.queue.queue_stats().await {
            Ok(stats) => info!(
                worker_id = %self.config.worker_id,
                queued = stats.queued,
                in_progress = stats.in_progress,
                completed = stats.completed,
                errored = stats.errored,
                "queue stats"
            ),
            Err(e) => warn!(error = %e, "failed to read queue stats"),
        }
    }
}

fn reap(tasks: &mut JoinSet<Uuid>) {
    while let Some(result) = tasks.try_join_next() {
        log_join(result);
    }
}

fn log_join(result: std::result::Result<Uuid, tokio::task::JoinError>) {
    match result {
        Ok(job_id) => debug!(job_id = %job_id, "job task finished"),
        Err(e) => error!(error = %e, "job task failed to join"),
    }
}

/// Run one job and settle its outcome. Never panics or returns an error.
async fn run_job(
    queue: QueueManager,
    processor: Arc<dyn JobProcessor>,
    job: Job,
    cancel: CancellationToken,
    retry_budget: i32,
    worker_id: &str,
) {
    let (reporter, receiver) = progress_channel(job.id);
    let writer = receiver.spawn_writer(queue.clone(), worker_id.to_string());
    let ctx = ProcessContext::new(reporter.clone(), cancel);

    let result = AssertUnwindSafe(processor.process(&job, ctx))
        .catch_unwind()
        .await;

    // Progress writes must land before the terminal status write.
    reporter.finish();
    if let Err(e) = writer.await {
        warn!(job_id = %job.id, error = %e, "progress writer failed");
    }

    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => JobOutcome::Fatal(format!("{:#}", e)),
        Err(panic) => JobOutcome::Fatal(format!("processor panicked: {}", panic_message(&*panic))),
    };

    settle(&queue, &job, outcome, retry_budget, worker_id).await;
}

async fn settle(
    queue: &QueueManager,
    job: &Job,
    outcome: JobOutcome,
    retry_budget: i32,
    worker_id: &str,
) {
    let label = outcome.label();
    let result = match outcome {
        JobOutcome::Completed(value) => {
            info!(job_id = %job.id, "job completed");
            queue
                .update_job_status(job.id, JobStatus::Completed, Some(worker_id), Some(&value), None)
                .await
        }
        JobOutcome::Retry {
            reason,
            retry_count,
        } if job.has_retry_budget(retry_budget) => {
            let retry_count = retry_count.max(job.retry_count + 1);
            warn!(job_id = %job.id, retry_count, reason = %reason, "job will be retried");
            queue
                .requeue_job_for_worker(job.id, worker_id, retry_count, Some(&reason))
                .await
        }
        JobOutcome::Retry { reason, .. } => {
            let message = format!("retry budget exhausted: {}", reason);
            error!(job_id = %job.id, retry_count = job.retry_count, "{}", message);
            queue
                .update_job_status(job.id, JobStatus::Errored, Some(worker_id), None, Some(&message))
                .await
        }
        JobOutcome::Fatal(message) => {
            error!(job_id = %job.id, error = %message, "job failed");
            queue
                .update_job_status(job.id, JobStatus::Errored, Some(worker_id), None, Some(&message))
                .await
        }
        JobOutcome::Interrupted { reason } => {
            warn!(job_id = %job.id, reason = %reason, "job interrupted, returning to queue");
            queue
                .requeue_job_for_worker(job.id, worker_id, job.retry_count, Some(&reason))
                .await
        }
    };

    if let Err(e) = result {
        error!(job_id = %job.id, outcome = label, error = %e, "failed to record job outcome");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::{InMemoryJobStore, JobStore, JobType, QueueConfig};
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_parallel_jobs, 3);
        assert_eq!(config.retry_budget, 3);
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn test_config_with_worker_id() {
        let config = WorkerConfig::with_worker_id("my-worker");
        assert_eq!(config.worker_id, "my-worker");
    }

    #[tokio::test]
    async fn test_settle_leaves_reclaimed_jobs_alone() {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = QueueManager::new(store.clone(), QueueConfig::default());
        queue
            .submit_job(Uuid::new_v4(), JobType::ResearchPack, json!({"topic": "X"}))
            .await
            .unwrap();

        let stale = queue.get_next_jobs("w1", None).await.unwrap().remove(0);
        queue.release_worker_jobs("w1").await.unwrap();
        queue.get_next_jobs("w2", None).await.unwrap();

        settle(&queue, &stale, JobOutcome::Fatal("stale".into()), 3, "w1").await;
        settle(
            &queue,
            &stale,
            JobOutcome::Retry {
                reason: "stale".into(),
                retry_count: 1,
            },
            3,
            "w1",
        )
        .await;

        let job = store.find_by_id(stale.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert_eq!(job.worker_id.as_deref(), Some("w2"));
        assert_eq!(job.retry_count, 0);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");

        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*boxed), "unknown panic payload");
    }
}
