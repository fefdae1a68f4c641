//! Test fixtures: job rows, scripted processors and polling helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docsmith_core::kernel::jobs::{
    Job, JobOutcome, JobProcessor, JobStatus, JobStore, JobType, ProcessContext, QueueManager,
};
use serde_json::json;
use uuid::Uuid;

pub fn research_params(topic: &str) -> serde_json::Value {
    json!({ "topic": topic })
}

/// A queued research pack row with explicit priority and creation time.
pub fn queued_job(priority: i32, created_at: DateTime<Utc>) -> Job {
    Job::builder()
        .user_id(Uuid::new_v4())
        .job_type(JobType::ResearchPack)
        .params(research_params("Fixture topic"))
        .priority(priority)
        .created_at(created_at)
        .build()
}

pub async fn insert_job(store: &dyn JobStore, job: Job) -> Job {
    store.insert(&job).await.expect("Failed to insert job");
    job
}

/// Poll until the job matches `done`, panicking after `timeout`.
pub async fn wait_for_job<F>(queue: &QueueManager, job_id: Uuid, timeout: Duration, done: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(job) = queue.get_job_status(job_id).await.expect("status lookup failed") {
            if done(&job) {
                return job;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            let job = queue.get_job_status(job_id).await.ok().flatten();
            panic!("timed out waiting for job {}: {:?}", job_id, job);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status(
    queue: &QueueManager,
    job_id: Uuid,
    status: JobStatus,
    timeout: Duration,
) -> Job {
    wait_for_job(queue, job_id, timeout, |job| job.status == status).await
}

// =============================================================================
// Scripted processors
// =============================================================================

/// Returns a fixed outcome and counts its runs.
pub struct ScriptedProcessor {
    outcome: JobOutcome,
    runs: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn new(outcome: JobOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobProcessor for ScriptedProcessor {
    async fn process(&self, _job: &Job, ctx: ProcessContext) -> Result<JobOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.progress.report(50.0, Some("halfway"));
        Ok(self.outcome.clone())
    }
}

/// Asks for a retry with the job's next retry count.
pub struct AlwaysRetry;

#[async_trait]
impl JobProcessor for AlwaysRetry {
    async fn process(&self, job: &Job, _ctx: ProcessContext) -> Result<JobOutcome> {
        Ok(JobOutcome::Retry {
            reason: "provider timed out".into(),
            retry_count: job.retry_count + 1,
        })
    }
}

pub struct FailingProcessor;

#[async_trait]
impl JobProcessor for FailingProcessor {
    async fn process(&self, _job: &Job, _ctx: ProcessContext) -> Result<JobOutcome> {
        anyhow::bail!("processor exploded")
    }
}

pub struct PanickingProcessor;

#[async_trait]
impl JobProcessor for PanickingProcessor {
    async fn process(&self, _job: &Job, _ctx: ProcessContext) -> Result<JobOutcome> {
        panic!("processor panicked on purpose");
    }
}

/// Runs for `duration` unless cancelled first, tracking peak concurrency.
pub struct SlowProcessor {
    duration: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowProcessor {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobProcessor for SlowProcessor {
    async fn process(&self, _job: &Job, ctx: ProcessContext) -> Result<JobOutcome> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let outcome = tokio::select! {
            _ = tokio::time::sleep(self.duration) => JobOutcome::Completed(json!({"done": true})),
            _ = ctx.cancel.cancelled() => JobOutcome::Interrupted {
                reason: "shutdown".into(),
            },
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(outcome)
    }
}
