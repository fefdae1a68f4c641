//! Processor registry mapping job types to the code that runs them.
//!
//! Each job type registers one [`JobProcessor`] at startup. When the worker
//! claims a job it looks the processor up here; a job type without a
//! registration is a fatal error for that job, never for the worker.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::job::{Job, JobType};
use super::progress::ProgressReporter;

/// What a processor decided about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Finished; the value becomes the job's `result`.
    Completed(serde_json::Value),
    /// Transient failure; requeue with the given retry count.
    Retry { reason: String, retry_count: i32 },
    /// Permanent failure; the job is marked errored.
    Fatal(String),
    /// Stopped by shutdown before finishing; requeued without using retry budget.
    Interrupted { reason: String },
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed(_) => "completed",
            JobOutcome::Retry { .. } => "retry",
            JobOutcome::Fatal(_) => "fatal",
            JobOutcome::Interrupted { .. } => "interrupted",
        }
    }
}

/// Per-run handles passed to a processor.
#[derive(Clone)]
pub struct ProcessContext {
    pub progress: ProgressReporter,
    /// Cancelled when the worker's shutdown grace period runs out.
    pub cancel: CancellationToken,
}

impl ProcessContext {
    pub fn new(progress: ProgressReporter, cancel: CancellationToken) -> Self {
        Self { progress, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Run `job` to an outcome. A returned `Err` is treated like `Fatal`.
    async fn process(&self, job: &Job, ctx: ProcessContext) -> Result<JobOutcome>;
}

#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<JobType, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the processor for `job_type`, replacing any earlier one.
    pub fn register(&mut self, job_type: JobType, processor: Arc<dyn JobProcessor>) {
        self.processors.insert(job_type, processor);
    }

    pub fn with(mut self, job_type: JobType, processor: Arc<dyn JobProcessor>) -> Self {
        self.register(job_type, processor);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobProcessor>> {
        self.processors.get(&job_type).cloned()
    }

    pub fn is_registered(&self, job_type: JobType) -> bool {
        self.processors.contains_key(&job_type)
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.processors.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobProcessor for Noop {
        async fn process(&self, _job: &Job, _ctx: ProcessContext) -> Result<JobOutcome> {
            Ok(JobOutcome::Completed(serde_json::Value::Null))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ProcessorRegistry::new().with(JobType::ResearchPack, Arc::new(Noop));

        assert!(registry.is_registered(JobType::ResearchPack));
        assert!(!registry.is_registered(JobType::ReviewPaper));
        assert!(registry.get(JobType::ReviewPaper).is_none());
        assert_eq!(registry.registered_types(), vec![JobType::ResearchPack]);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(JobOutcome::Fatal("x".into()).label(), "fatal");
        assert_eq!(
            JobOutcome::Retry {
                reason: "x".into(),
                retry_count: 1
            }
            .label(),
            "retry"
        );
    }
}
