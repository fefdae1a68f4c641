//! In-memory [`JobStore`] for tests and local runs without a database.
//!
//! All state sits behind one lock, so a claim counts and transitions rows in a
//! single critical section, the same guarantee the Postgres store gets from
//! its advisory lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::job::{Job, JobStatus, PRIORITY_COMPLETED, PRIORITY_ERRORED};
use super::job_store::{ClaimRequest, JobStore};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    progress_history: HashMap<Uuid, Vec<f64>>,
}

#[derive(Default)]
pub struct InMemoryJobStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every progress value written for a job, in write order.
    pub async fn progress_history(&self, id: Uuid) -> Vec<f64> {
        self.state
            .read()
            .await
            .progress_history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn all_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.state.read().await.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("job store unavailable");
        }
        Ok(())
    }

    /// Apply `f` to the job if it is currently in `from` and, when `owner` is
    /// given, still assigned to that worker.
    async fn transition<F>(
        &self,
        id: Uuid,
        from: JobStatus,
        owner: Option<&str>,
        f: F,
    ) -> Result<bool>
    where
        F: FnOnce(&mut Job),
    {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == from && owned_by(job, owner) => {
                f(job);
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn owned_by(job: &Job, owner: Option<&str>) -> bool {
    owner.map_or(true, |owner| job.worker_id.as_deref() == Some(owner))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            bail!("job {} already exists", job.id);
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        self.check_available()?;
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn find_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut counts: HashMap<JobStatus, i64> = HashMap::new();
        for job in state.jobs.values() {
            *counts.entry(job.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn claim_queued(&self, claim: ClaimRequest<'_>) -> Result<Vec<Job>> {
        self.check_available()?;
        let mut state = self.state.write().await;

        let in_progress = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::InProgress)
            .count() as i64;
        let slots = (claim.max_in_progress - in_progress).min(claim.limit);
        if slots <= 0 {
            return Ok(Vec::new());
        }

        let mut queued: Vec<(i32, DateTime<Utc>, Uuid)> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .map(|j| (j.priority, j.created_at, j.id))
            .collect();
        queued.sort();

        let now = Utc::now();
        let mut claimed = Vec::new();
        for (_, _, id) in queued.into_iter().take(slots as usize) {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = JobStatus::InProgress;
                job.worker_id = Some(claim.worker_id.to_string());
                job.estimated_completion_time = Some(claim.estimated_completion_time);
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_in_progress(
        &self,
        id: Uuid,
        worker_id: Option<&str>,
        estimated_completion_time: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(id, JobStatus::Queued, None, |job| {
            job.status = JobStatus::InProgress;
            if let Some(worker_id) = worker_id {
                job.worker_id = Some(worker_id.to_string());
            }
            job.estimated_completion_time = Some(estimated_completion_time);
        })
        .await
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        owner: Option<&str>,
        result: &serde_json::Value,
    ) -> Result<bool> {
        self.transition(id, JobStatus::InProgress, owner, |job| {
            job.status = JobStatus::Completed;
            job.priority = PRIORITY_COMPLETED;
            job.result = Some(result.clone());
            job.progress = 100.0;
            job.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_errored(
        &self,
        id: Uuid,
        owner: Option<&str>,
        error_message: &str,
    ) -> Result<bool> {
        self.transition(id, JobStatus::InProgress, owner, |job| {
            job.status = JobStatus::Errored;
            job.priority = PRIORITY_ERRORED;
            job.error_message = Some(error_message.to_string());
        })
        .await
    }

    async fn requeue(
        &self,
        id: Uuid,
        owner: Option<&str>,
        retry_count: i32,
        error_message: Option<&str>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&id) {
            Some(job)
                if job.status == JobStatus::InProgress
                    && job.retry_count <= retry_count
                    && owned_by(job, owner) =>
            {
                job.status = JobStatus::Queued;
                job.worker_id = None;
                job.retry_count = retry_count;
                job.error_message = error_message.map(str::to_string);
                job.estimated_completion_time = None;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        id: Uuid,
        owner: Option<&str>,
        progress: f64,
        message: Option<&str>,
        estimated_completion_time: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let updated = match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::InProgress && owned_by(job, owner) => {
                job.progress = progress;
                if let Some(message) = message {
                    job.progress_message = Some(message.to_string());
                }
                if let Some(eta) = estimated_completion_time {
                    job.estimated_completion_time = Some(eta);
                }
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        };
        if updated {
            state.progress_history.entry(id).or_default().push(progress);
        }
        Ok(updated)
    }

    async fn resubmit(&self, id: Uuid) -> Result<bool> {
        self.transition(id, JobStatus::Errored, None, |job| {
            job.status = JobStatus::Queued;
            job.worker_id = None;
            job.error_message = None;
        })
        .await
    }

    async fn release_worker(&self, worker_id: &str) -> Result<u64> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut released = 0;
        for job in state.jobs.values_mut() {
            if job.status == JobStatus::InProgress && job.worker_id.as_deref() == Some(worker_id) {
                job.status = JobStatus::Queued;
                job.worker_id = None;
                job.estimated_completion_time = None;
                job.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.status == JobStatus::Completed
                && job.completed_at.map_or(false, |at| at < cutoff))
        });
        Ok((before - state.jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::JobType;
    use chrono::Duration;
    use serde_json::json;

    fn queued(priority: i32, created_at: DateTime<Utc>) -> Job {
        Job::builder()
            .user_id(Uuid::new_v4())
            .job_type(JobType::ResearchPack)
            .params(json!({"topic": "X"}))
            .priority(priority)
            .created_at(created_at)
            .build()
    }

    fn claim(limit: i64, max_in_progress: i64) -> ClaimRequest<'static> {
        ClaimRequest {
            worker_id: "w1",
            limit,
            max_in_progress,
            estimated_completion_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn claim_respects_global_cap() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store.insert(&queued(3, now + Duration::seconds(i))).await.unwrap();
        }

        let first = store.claim_queued(claim(10, 2)).await.unwrap();
        assert_eq!(first.len(), 2);

        let second = store.claim_queued(claim(10, 2)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = InMemoryJobStore::new();
        let job = queued(3, Utc::now());
        store.insert(&job).await.unwrap();
        assert!(store.insert(&job).await.is_err());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryJobStore::new();
        store.set_unavailable(true);
        assert!(store.find_by_id(Uuid::new_v4()).await.is_err());
        assert!(store.insert(&queued(3, Utc::now())).await.is_err());
    }

    #[tokio::test]
    async fn progress_is_ignored_outside_in_progress() {
        let store = InMemoryJobStore::new();
        let job = queued(3, Utc::now());
        store.insert(&job).await.unwrap();

        let updated = store
            .update_progress(job.id, None, 40.0, None, None)
            .await
            .unwrap();
        assert!(!updated);
        assert!(store.progress_history(job.id).await.is_empty());
    }

    #[tokio::test]
    async fn writes_for_another_worker_are_refused() {
        let store = InMemoryJobStore::new();
        let job = queued(3, Utc::now());
        store.insert(&job).await.unwrap();
        store.claim_queued(claim(1, 3)).await.unwrap();

        assert!(!store
            .update_progress(job.id, Some("w2"), 40.0, None, None)
            .await
            .unwrap());
        assert!(!store.mark_errored(job.id, Some("w2"), "stale").await.unwrap());
        assert!(!store.requeue(job.id, Some("w2"), 1, None).await.unwrap());
        assert!(store
            .mark_completed(job.id, Some("w1"), &json!({}))
            .await
            .unwrap());

        let stored = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.error_message.is_none());
        assert!(store.progress_history(job.id).await.is_empty());
    }
}
