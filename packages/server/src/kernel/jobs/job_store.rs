//! Durable storage for generation jobs.
//!
//! [`JobStore`] is the persistence seam used by the [`QueueManager`]. Every
//! state-changing method is a conditional update: it only applies when the
//! row is in the status the transition starts from, and reports whether a row
//! was changed. Writes made on behalf of a worker also pass that worker as
//! `owner`; they only apply while the row is still assigned to it. ETAs and
//! the capacity cap are decided by the caller; the terminal priorities come
//! from the constants in [`super::job`].
//!
//! [`QueueManager`]: super::QueueManager

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{Job, JobStatus, PRIORITY_COMPLETED, PRIORITY_ERRORED};

/// Arguments for an atomic claim of queued jobs.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest<'a> {
    pub worker_id: &'a str,
    /// Most jobs this caller will take.
    pub limit: i64,
    /// Global cap on `in_progress` jobs across every worker sharing the store.
    pub max_in_progress: i64,
    pub estimated_completion_time: DateTime<Utc>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>>;

    /// Jobs of a user, newest first.
    async fn find_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>>;

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>>;

    /// Claim up to `min(limit, max_in_progress - in_progress)` queued jobs in
    /// `(priority, created_at)` order as one atomic operation.
    async fn claim_queued(&self, claim: ClaimRequest<'_>) -> Result<Vec<Job>>;

    /// `queued -> in_progress` for a single job.
    async fn mark_in_progress(
        &self,
        id: Uuid,
        worker_id: Option<&str>,
        estimated_completion_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// `in_progress -> completed`.
    async fn mark_completed(
        &self,
        id: Uuid,
        owner: Option<&str>,
        result: &serde_json::Value,
    ) -> Result<bool>;

    /// `in_progress -> errored`.
    async fn mark_errored(&self, id: Uuid, owner: Option<&str>, error_message: &str)
        -> Result<bool>;

    /// `in_progress -> queued`, leaving priority and params untouched.
    async fn requeue(
        &self,
        id: Uuid,
        owner: Option<&str>,
        retry_count: i32,
        error_message: Option<&str>,
    ) -> Result<bool>;

    /// Progress write for an `in_progress` job.
    async fn update_progress(
        &self,
        id: Uuid,
        owner: Option<&str>,
        progress: f64,
        message: Option<&str>,
        estimated_completion_time: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// `errored -> queued` (operator resubmit).
    async fn resubmit(&self, id: Uuid) -> Result<bool>;

    /// Return every `in_progress` job owned by `worker_id` to `queued`.
    async fn release_worker(&self, worker_id: &str) -> Result<u64>;

    /// Delete `completed` jobs whose `completed_at` is before `cutoff`.
    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

const JOB_COLUMNS: &str = "id, user_id, job_type, status, priority, params, retry_count, worker_id, \
     progress, progress_message, result, error_message, created_at, updated_at, completed_at, \
     estimated_completion_time";

/// Advisory lock key serializing claims across workers.
const CLAIM_LOCK_KEY: i64 = 0x646f_6373_6d69_7468;

/// PostgreSQL-backed job store over the `generation_jobs` table.
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO generation_jobs (
                id, user_id, job_type, status, priority, params, retry_count, worker_id,
                progress, progress_message, result, error_message,
                created_at, updated_at, completed_at, estimated_completion_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(job.id)
        .bind(job.user_id)
        .bind(job.job_type)
        .bind(job.status)
        .bind(job.priority)
        .bind(&job.params)
        .bind(job.retry_count)
        .bind(&job.worker_id)
        .bind(job.progress)
        .bind(&job.progress_message)
        .bind(&job.result)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .bind(job.estimated_completion_time)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert job {}", job.id))?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM generation_jobs WHERE id = $1", JOB_COLUMNS);
        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn find_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM generation_jobs
            WHERE user_id = $1
              AND ($2::generation_job_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            JOB_COLUMNS
        );
        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(user_id)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(jobs)
    }

    async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>> {
        let counts = sqlx::query_as::<_, (JobStatus, i64)>(
            "SELECT status, COUNT(*) FROM generation_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    async fn claim_queued(&self, claim: ClaimRequest<'_>) -> Result<Vec<Job>> {
        let mut tx = self.pool.begin().await?;

        // Serialize count-and-claim across workers so the global cap holds.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CLAIM_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            WITH capacity AS (
                SELECT GREATEST($2 - COUNT(*), 0) AS slots
                FROM generation_jobs
                WHERE status = 'in_progress'
            ),
            next_jobs AS (
                SELECT id
                FROM generation_jobs
                WHERE status = 'queued'
                ORDER BY priority ASC, created_at ASC
                LIMIT LEAST($1, (SELECT slots FROM capacity))
                FOR UPDATE SKIP LOCKED
            )
            UPDATE generation_jobs
            SET status = 'in_progress',
                worker_id = $3,
                estimated_completion_time = $4,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let mut jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(claim.limit)
            .bind(claim.max_in_progress)
            .bind(claim.worker_id)
            .bind(claim.estimated_completion_time)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        // RETURNING does not preserve the CTE order.
        jobs.sort_by(|a, b| {
            (a.priority, a.created_at).cmp(&(b.priority, b.created_at))
        });
        Ok(jobs)
    }

    async fn mark_in_progress(
        &self,
        id: Uuid,
        worker_id: Option<&str>,
        estimated_completion_time: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'in_progress',
                worker_id = COALESCE($2, worker_id),
                estimated_completion_time = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(estimated_completion_time)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        owner: Option<&str>,
        result: &serde_json::Value,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'completed',
                priority = $3,
                result = $4,
                progress = 100,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
              AND ($2::text IS NULL OR worker_id = $2)
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(PRIORITY_COMPLETED)
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() > 0)
    }

    async fn mark_errored(
        &self,
        id: Uuid,
        owner: Option<&str>,
        error_message: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'errored',
                priority = $3,
                error_message = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
              AND ($2::text IS NULL OR worker_id = $2)
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(PRIORITY_ERRORED)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn requeue(
        &self,
        id: Uuid,
        owner: Option<&str>,
        retry_count: i32,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'queued',
                worker_id = NULL,
                retry_count = $3,
                error_message = $4,
                estimated_completion_time = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress' AND retry_count <= $3
              AND ($2::text IS NULL OR worker_id = $2)
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(retry_count)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        owner: Option<&str>,
        progress: f64,
        message: Option<&str>,
        estimated_completion_time: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET progress = $3,
                progress_message = COALESCE($4, progress_message),
                estimated_completion_time = COALESCE($5, estimated_completion_time),
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
              AND ($2::text IS NULL OR worker_id = $2)
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(progress)
        .bind(message)
        .bind(estimated_completion_time)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn resubmit(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'queued',
                worker_id = NULL,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'errored'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_worker(&self, worker_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = 'queued',
                worker_id = NULL,
                estimated_completion_time = NULL,
                updated_at = NOW()
            WHERE worker_id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM generation_jobs
            WHERE status = 'completed'
              AND completed_at IS NOT NULL
              AND completed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
