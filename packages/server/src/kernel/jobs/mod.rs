//! Job queue and worker infrastructure for generation jobs.
//!
//! This module provides the kernel-level infrastructure for job execution:
//! - [`Job`] - Job model and lifecycle state machine
//! - [`JobStore`] - Persistence seam ([`PostgresJobStore`], [`InMemoryJobStore`])
//! - [`QueueManager`] - Scheduling policy: submission, claim order, transitions
//! - [`Worker`] - Long-running loop that claims and runs jobs
//! - [`ProcessorRegistry`] - Maps job types to [`JobProcessor`]s
//!
//! # Architecture
//!
//! ```text
//! caller ──► QueueManager::submit_job ──► JobStore (queued)
//!
//! Worker
//!     │
//!     ├─► QueueManager::get_next_jobs (claim, in_progress)
//!     ├─► JobProcessor::process(job, ProcessContext)
//!     │       └─► ProgressReporter ──► QueueManager::update_job_progress_for_worker
//!     └─► completed | requeued | errored
//! ```
//!
//! Job-type specific processing lives in the domains; this module only
//! provides the infrastructure.

mod job;
mod job_store;
mod memory_store;
mod params;
mod progress;
mod queue;
mod registry;
mod worker;

pub use job::{
    Job, JobStatus, JobType, DEFAULT_RETRY_BUDGET, PRIORITY_COMPLETED, PRIORITY_ERRORED,
    PRIORITY_NEW,
};
pub use job_store::{ClaimRequest, JobStore, PostgresJobStore};
pub use memory_store::InMemoryJobStore;
pub use params::{CitationStyle, JobParams, ParamsError, ResearchPackParams, ReviewPaperParams};
pub use progress::{progress_channel, ProgressReceiver, ProgressReporter, ProgressUpdate};
pub use queue::{QueueConfig, QueueError, QueueManager, QueueStats, SubmitError};
pub use registry::{JobOutcome, JobProcessor, ProcessContext, ProcessorRegistry};
pub use worker::{Worker, WorkerConfig};
