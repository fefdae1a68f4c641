//! Scheduling policy over a [`JobStore`].
//!
//! The [`QueueManager`] owns every rule about how jobs move: which jobs a
//! worker gets, in what order, under which global cap, and what each status
//! transition writes. Workers and operator tools never touch the store
//! directly.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{Job, JobStatus, JobType};
use super::job_store::{ClaimRequest, JobStore};
use super::params::{JobParams, ParamsError};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidParams(#[from] ParamsError),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {id} is {status}; only errored jobs can be resubmitted")]
    NotResubmittable { id: Uuid, status: JobStatus },

    #[error("job {id} is no longer owned by worker {worker_id}")]
    NotOwner { id: Uuid, worker_id: String },

    #[error("retention must be a non-negative number of days within range, got {0}")]
    InvalidRetention(i64),

    #[error("job {id} retry count cannot decrease from {current} to {requested}")]
    RetryCountDecrease {
        id: Uuid,
        current: i32,
        requested: i32,
    },

    #[error("job store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Global cap on `in_progress` jobs across all workers.
    pub max_parallel_jobs: i64,
    /// Expected wall time of one job, used for ETAs.
    pub nominal_job_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: 3,
            nominal_job_duration: Duration::minutes(10),
        }
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub errored: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.queued + self.in_progress + self.completed + self.errored
    }
}

#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn JobStore>,
    config: QueueConfig,
}

impl QueueManager {
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate params and enqueue a new job.
    ///
    /// The id is generated here, so it is returned even when the write fails;
    /// the failure is only logged.
    pub async fn submit_job(
        &self,
        user_id: Uuid,
        job_type: JobType,
        params: serde_json::Value,
    ) -> Result<Uuid, SubmitError> {
        JobParams::parse(job_type, &params)?;
        let job = Job::submitted(user_id, job_type, params);
        let job_id = job.id;

        match self.store.insert(&job).await {
            Ok(()) => info!(job_id = %job_id, user_id = %user_id, job_type = %job_type, "job submitted"),
            Err(e) => error!(
                job_id = %job_id,
                user_id = %user_id,
                job_type = %job_type,
                error = %e,
                "failed to persist submitted job"
            ),
        }

        Ok(job_id)
    }

    /// Claim the next jobs for `worker_id`, at most `limit` (default: the
    /// global cap) and never more than the free global capacity.
    pub async fn get_next_jobs(
        &self,
        worker_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Job>, QueueError> {
        let limit = limit.unwrap_or(self.config.max_parallel_jobs);
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let jobs = self
            .store
            .claim_queued(ClaimRequest {
                worker_id,
                limit,
                max_in_progress: self.config.max_parallel_jobs,
                estimated_completion_time: Utc::now() + self.config.nominal_job_duration,
            })
            .await?;

        if !jobs.is_empty() {
            debug!(worker_id = %worker_id, count = jobs.len(), "claimed jobs");
        }
        Ok(jobs)
    }

    /// Apply a status transition.
    ///
    /// `queued` is reached through [`requeue_job`](Self::requeue_job) semantics
    /// from `in_progress` (retry count kept) and through
    /// [`resubmit_job`](Self::resubmit_job) from `errored`. With a
    /// `worker_id`, leaving `in_progress` is refused unless that worker still
    /// owns the job.
    pub async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        worker_id: Option<&str>,
        result: Option<&serde_json::Value>,
        error_message: Option<&str>,
    ) -> Result<(), QueueError> {
        let applied = match status {
            JobStatus::InProgress => {
                let eta = Utc::now() + self.config.nominal_job_duration;
                self.store.mark_in_progress(job_id, worker_id, eta).await?
            }
            JobStatus::Completed => {
                let result = result.cloned().unwrap_or(serde_json::Value::Null);
                self.store.mark_completed(job_id, worker_id, &result).await?
            }
            JobStatus::Errored => {
                let message = error_message.unwrap_or("unknown error");
                self.store.mark_errored(job_id, worker_id, message).await?
            }
            JobStatus::Queued => {
                let job = self.require_job(job_id).await?;
                return match job.status {
                    JobStatus::InProgress => {
                        self.requeue(job_id, worker_id, job.retry_count, error_message)
                            .await
                    }
                    JobStatus::Errored => self.resubmit_job(job_id).await,
                    from => Err(QueueError::InvalidTransition {
                        id: job_id,
                        from,
                        to: JobStatus::Queued,
                    }),
                };
            }
        };

        if !applied {
            return Err(self.transition_failure(job_id, status, worker_id).await);
        }
        debug!(job_id = %job_id, status = %status, "job status updated");
        Ok(())
    }

    /// Return an `in_progress` job to `queued` with `retry_count`.
    /// Priority and params are left as they are.
    pub async fn requeue_job(
        &self,
        job_id: Uuid,
        retry_count: i32,
        error_message: Option<&str>,
    ) -> Result<(), QueueError> {
        self.requeue(job_id, None, retry_count, error_message).await
    }

    /// [`requeue_job`](Self::requeue_job) on behalf of `worker_id`, refused
    /// once the job has been handed to another worker.
    pub async fn requeue_job_for_worker(
        &self,
        job_id: Uuid,
        worker_id: &str,
        retry_count: i32,
        error_message: Option<&str>,
    ) -> Result<(), QueueError> {
        self.requeue(job_id, Some(worker_id), retry_count, error_message)
            .await
    }

    async fn requeue(
        &self,
        job_id: Uuid,
        worker_id: Option<&str>,
        retry_count: i32,
        error_message: Option<&str>,
    ) -> Result<(), QueueError> {
        if self
            .store
            .requeue(job_id, worker_id, retry_count, error_message)
            .await?
        {
            info!(job_id = %job_id, retry_count, "job requeued");
            return Ok(());
        }

        let job = self.require_job(job_id).await?;
        if let Some(err) = not_owner(&job, worker_id) {
            return Err(err);
        }
        if job.status == JobStatus::InProgress && retry_count < job.retry_count {
            return Err(QueueError::RetryCountDecrease {
                id: job_id,
                current: job.retry_count,
                requested: retry_count,
            });
        }
        Err(QueueError::InvalidTransition {
            id: job_id,
            from: job.status,
            to: JobStatus::Queued,
        })
    }

    /// Record progress for an `in_progress` job. Writes against jobs in any
    /// other status are ignored.
    pub async fn update_job_progress(
        &self,
        job_id: Uuid,
        progress: f64,
        message: Option<&str>,
    ) -> Result<(), QueueError> {
        self.record_progress(job_id, None, progress, message).await
    }

    /// [`update_job_progress`](Self::update_job_progress) on behalf of
    /// `worker_id`; ignored once another worker owns the job.
    pub async fn update_job_progress_for_worker(
        &self,
        job_id: Uuid,
        worker_id: &str,
        progress: f64,
        message: Option<&str>,
    ) -> Result<(), QueueError> {
        self.record_progress(job_id, Some(worker_id), progress, message)
            .await
    }

    async fn record_progress(
        &self,
        job_id: Uuid,
        worker_id: Option<&str>,
        progress: f64,
        message: Option<&str>,
    ) -> Result<(), QueueError> {
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let eta = self.eta_for(progress, Utc::now());

        let applied = self
            .store
            .update_progress(job_id, worker_id, progress, message, eta)
            .await?;
        if !applied {
            debug!(job_id = %job_id, progress, "progress ignored for job not in progress for this worker");
        }
        Ok(())
    }

    /// `errored -> queued`, clearing owner and error.
    pub async fn resubmit_job(&self, job_id: Uuid) -> Result<(), QueueError> {
        if self.store.resubmit(job_id).await? {
            info!(job_id = %job_id, "job resubmitted");
            return Ok(());
        }
        let job = self.require_job(job_id).await?;
        Err(QueueError::NotResubmittable {
            id: job_id,
            status: job.status,
        })
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.store.find_by_id(job_id).await?)
    }

    /// A user's jobs, newest first.
    pub async fn get_user_jobs(
        &self,
        user_id: Uuid,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.find_by_user(user_id, limit, status).await?)
    }

    /// Delete completed jobs finished more than `days_old` days ago.
    ///
    /// Negative ages and ages that reach past the representable date range
    /// are rejected.
    pub async fn clean_completed_jobs(&self, days_old: i64) -> Result<u64, QueueError> {
        if days_old < 0 {
            return Err(QueueError::InvalidRetention(days_old));
        }
        let cutoff = Duration::try_days(days_old)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or(QueueError::InvalidRetention(days_old))?;
        let deleted = self.store.delete_completed_before(cutoff).await?;
        info!(days_old, deleted, "cleaned completed jobs");
        Ok(deleted)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for (status, count) in self.store.count_by_status().await? {
            match status {
                JobStatus::Queued => stats.queued = count,
                JobStatus::InProgress => stats.in_progress = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Errored => stats.errored = count,
            }
        }
        Ok(stats)
    }

    /// Requeue jobs left `in_progress` under `worker_id` by a previous run.
    pub async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, QueueError> {
        let released = self.store.release_worker(worker_id).await?;
        if released > 0 {
            warn!(worker_id = %worker_id, released, "released jobs left over from a previous run");
        }
        Ok(released)
    }

    /// ETA for a job at `progress`, or `None` when it is not strictly between 0 and 100.
    fn eta_for(&self, progress: f64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if progress <= 0.0 || progress >= 100.0 {
            return None;
        }
        let remaining_ms =
            self.config.nominal_job_duration.num_milliseconds() as f64 * (100.0 - progress) / 100.0;
        Some(now + Duration::milliseconds(remaining_ms.round() as i64))
    }

    async fn require_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.store
            .find_by_id(job_id)
            .await?
            .ok_or(QueueError::NotFound(job_id))
    }

    async fn transition_failure(
        &self,
        job_id: Uuid,
        to: JobStatus,
        worker_id: Option<&str>,
    ) -> QueueError {
        match self.require_job(job_id).await {
            Ok(job) => not_owner(&job, worker_id).unwrap_or(QueueError::InvalidTransition {
                id: job_id,
                from: job.status,
                to,
            }),
            Err(e) => e,
        }
    }
}

/// `NotOwner` when `worker_id` is given and the job is running under someone else.
fn not_owner(job: &Job, worker_id: Option<&str>) -> Option<QueueError> {
    let worker_id = worker_id?;
    if job.status == JobStatus::InProgress && job.worker_id.as_deref() != Some(worker_id) {
        return Some(QueueError::NotOwner {
            id: job.id,
            worker_id: worker_id.to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::InMemoryJobStore;
    use serde_json::json;

    fn manager(max_parallel_jobs: i64) -> (QueueManager, Arc<InMemoryJobStore>) {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = QueueManager::new(
            store.clone(),
            QueueConfig {
                max_parallel_jobs,
                ..QueueConfig::default()
            },
        );
        (queue, store)
    }

    #[test]
    fn test_eta_scales_with_remaining_work() {
        let (queue, _) = manager(3);
        let now = Utc::now();

        let eta = queue.eta_for(50.0, now).unwrap();
        assert_eq!(eta - now, Duration::minutes(5));
        assert!(queue.eta_for(0.0, now).is_none());
        assert!(queue.eta_for(100.0, now).is_none());
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_params() {
        let (queue, store) = manager(3);
        let err = queue
            .submit_job(Uuid::new_v4(), JobType::ResearchPack, json!({"topic": ""}))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::InvalidParams(_)));
        assert!(store.all_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_completed_cannot_be_errored() {
        let (queue, _) = manager(3);
        let id = queue
            .submit_job(Uuid::new_v4(), JobType::ResearchPack, json!({"topic": "X"}))
            .await
            .unwrap();
        queue.get_next_jobs("w1", None).await.unwrap();
        queue
            .update_job_status(id, JobStatus::Completed, None, Some(&json!({})), None)
            .await
            .unwrap();

        let err = queue
            .update_job_status(id, JobStatus::Errored, None, None, Some("boom"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Errored,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_submit_stores_params_as_submitted() {
        let (queue, store) = manager(3);
        let params = json!({"topic": "Soil", "audience": "growers"});
        let id = queue
            .submit_job(Uuid::new_v4(), JobType::ResearchPack, params.clone())
            .await
            .unwrap();

        // Defaulted fields are not written back into the stored row
        let job = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.params, params);
        assert!(job.params.get("questions").is_none());
    }

    #[tokio::test]
    async fn test_clean_rejects_out_of_range_ages() {
        let (queue, _) = manager(3);
        assert!(matches!(
            queue.clean_completed_jobs(-1).await,
            Err(QueueError::InvalidRetention(-1))
        ));
        assert!(matches!(
            queue.clean_completed_jobs(i64::MAX / 2).await,
            Err(QueueError::InvalidRetention(_))
        ));
        assert!(matches!(
            queue.clean_completed_jobs(100_000_000).await,
            Err(QueueError::InvalidRetention(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (queue, _) = manager(3);
        let err = queue.resubmit_job(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stats_count_each_status() {
        let (queue, _) = manager(1);
        for _ in 0..3 {
            queue
                .submit_job(Uuid::new_v4(), JobType::ReviewPaper, json!({"topic": "X"}))
                .await
                .unwrap();
        }
        queue.get_next_jobs("w1", None).await.unwrap();

        let stats = queue.queue_stats().await.unwrap();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.total(), 3);
    }
}
