//! Job model for generation requests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Priority assigned to freshly submitted jobs.
pub const PRIORITY_NEW: i32 = 3;
/// Priority assigned to errored jobs, so resubmitted work runs ahead of new work.
pub const PRIORITY_ERRORED: i32 = 2;
/// Priority of completed jobs (terminal, never dequeued).
pub const PRIORITY_COMPLETED: i32 = 0;

/// Number of transient-failure requeues a job may consume.
pub const DEFAULT_RETRY_BUDGET: i32 = 3;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "generation_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    InProgress,
    Completed,
    Errored,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Errored,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Errored)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// ```text
    /// queued      -> in_progress              (claim)
    /// in_progress -> completed | errored      (outcome)
    /// in_progress -> queued                   (requeue, interruption, crash recovery)
    /// errored     -> queued                   (operator resubmit)
    /// ```
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, InProgress)
                | (InProgress, Completed)
                | (InProgress, Errored)
                | (InProgress, Queued)
                | (Errored, Queued)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "generation_job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ResearchPack,
    ReviewPaper,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ResearchPack => "research_pack",
            JobType::ReviewPaper => "review_paper",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "research_pack" => Ok(JobType::ResearchPack),
            "review_paper" => Ok(JobType::ReviewPaper),
            other => Err(format!("unknown job type: {}", other)),
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    // Ownership
    pub user_id: Uuid,
    pub job_type: JobType,

    // Scheduling
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = PRIORITY_NEW)]
    pub priority: i32,

    // Payload
    pub params: serde_json::Value,

    // Execution
    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,

    // Progress
    #[builder(default = 0.0)]
    pub progress: f64,
    #[builder(default, setter(strip_option))]
    pub progress_message: Option<String>,

    // Outcome
    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub estimated_completion_time: Option<DateTime<Utc>>,
}

impl Job {
    /// A freshly submitted job with a client-generated id.
    pub fn submitted(user_id: Uuid, job_type: JobType, params: serde_json::Value) -> Self {
        Self::builder()
            .user_id(user_id)
            .job_type(job_type)
            .params(params)
            .build()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether another transient-failure requeue fits in `budget`.
    pub fn has_retry_budget(&self, budget: i32) -> bool {
        self.retry_count < budget
    }
}
