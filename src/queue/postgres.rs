//! PostgreSQL implementation of the job queue.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so that any number of workers can
//! dequeue concurrently without ever receiving the same job.

use crate::{
    Result, TrunklineError,
    job::{Job, JobData, JobId, JobStatus},
    priority::EventPriority,
    queue::{JobQueue, RetentionPolicy, next_retry_at},
    retry::RetryPolicy,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

#[derive(FromRow, Clone)]
pub(crate) struct JobRow {
    pub id: Uuid,
    pub event_type: String,
    pub event_id: Uuid,
    pub payload: serde_json::Value,
    pub status: String,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

const JOB_COLUMNS: &str = "id, event_type, event_id, payload, status, priority, attempts, \
     max_attempts, created_at, scheduled_at, started_at, completed_at, failed_at, error_message";

impl JobRow {
    pub fn into_job(self) -> Result<Job> {
        // The payload column holds the full wire-shape blob; the typed
        // columns are authoritative for everything else.
        let data: JobData = serde_json::from_value(self.payload)?;
        Ok(Job {
            id: self.id,
            event_type: self.event_type,
            event_id: self.event_id,
            payload: data.payload,
            status: serde_json::from_str(&self.status)?,
            priority: EventPriority::from_i32(self.priority).unwrap_or(EventPriority::Low),
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            created_at: self.created_at,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            error_message: self.error_message,
        })
    }
}

/// Queue backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresQueue {
    pool: PgPool,
    retry_policy: RetryPolicy,
}

impl PostgresQueue {
    /// Create a new queue with the default retry policy.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy applied by [`JobQueue::fail_job`].
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobQueue for PostgresQueue {
    async fn enqueue(&self, job: Job) -> Result<JobId> {
        sqlx::query(
            r#"
            INSERT INTO trunkline_jobs (
                id, event_type, event_id, payload, status, priority, attempts,
                max_attempts, created_at, scheduled_at, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id)
        .bind(&job.event_type)
        .bind(job.event_id)
        .bind(serde_json::to_value(job.data())?)
        .bind(serde_json::to_string(&job.status)?)
        .bind(job.priority.as_i32())
        .bind(job.attempts)
        // The queue's retry policy owns the attempt budget.
        .bind(self.retry_policy.max_attempts as i32)
        .bind(job.created_at)
        .bind(job.scheduled_at)
        .bind(&job.error_message)
        .execute(&self.pool)
        .await?;

        debug!(
            "Enqueued job {} ({}, priority {})",
            job.id, job.event_type, job.priority
        );

        Ok(job.id)
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE trunkline_jobs
            SET status = $1, started_at = $2, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM trunkline_jobs
                WHERE status IN ($3, $4) AND scheduled_at <= $5
                ORDER BY priority DESC, scheduled_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(serde_json::to_string(&JobStatus::Running)?)
        .bind(Utc::now())
        .bind(serde_json::to_string(&JobStatus::Pending)?)
        .bind(serde_json::to_string(&JobStatus::Retrying)?)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).transpose()
    }

    async fn complete_job(&self, job_id: JobId) -> Result<()> {
        let result =
            sqlx::query("UPDATE trunkline_jobs SET status = $1, completed_at = $2 WHERE id = $3")
                .bind(serde_json::to_string(&JobStatus::Completed)?)
                .bind(Utc::now())
                .bind(job_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(TrunklineError::JobNotFound {
                id: job_id.to_string(),
            });
        }

        Ok(())
    }

    async fn fail_job(&self, job_id: JobId, error_message: &str) -> Result<()> {
        let row = sqlx::query(
            "UPDATE trunkline_jobs SET error_message = $1 WHERE id = $2 RETURNING attempts",
        )
        .bind(error_message)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(TrunklineError::JobNotFound {
                id: job_id.to_string(),
            });
        };
        let attempts: i32 = row.get("attempts");
        let now = Utc::now();

        match next_retry_at(&self.retry_policy, attempts, now) {
            Some(retry_at) => {
                sqlx::query(
                    "UPDATE trunkline_jobs SET status = $1, scheduled_at = $2, started_at = NULL WHERE id = $3",
                )
                .bind(serde_json::to_string(&JobStatus::Retrying)?)
                .bind(retry_at)
                .bind(job_id)
                .execute(&self.pool)
                .await?;

                debug!(
                    "Job {} will retry in {}ms (attempt {}/{})",
                    job_id,
                    (retry_at - now).num_milliseconds(),
                    attempts,
                    self.retry_policy.max_attempts
                );
            }
            None => {
                sqlx::query(
                    "UPDATE trunkline_jobs SET status = $1, failed_at = $2 WHERE id = $3",
                )
                .bind(serde_json::to_string(&JobStatus::Failed)?)
                .bind(now)
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM trunkline_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_job).transpose()
    }

    async fn get_failed_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM trunkline_jobs WHERE status = $1 ORDER BY failed_at DESC LIMIT $2"
        ))
        .bind(serde_json::to_string(&JobStatus::Failed)?)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn queue_depth(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM trunkline_jobs WHERE status IN ($1, $2) AND scheduled_at <= $3",
        )
        .bind(serde_json::to_string(&JobStatus::Pending)?)
        .bind(serde_json::to_string(&JobStatus::Retrying)?)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn has_active_job(&self, event_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM trunkline_jobs WHERE event_id = $1 AND status IN ($2, $3, $4))",
        )
        .bind(event_id)
        .bind(serde_json::to_string(&JobStatus::Pending)?)
        .bind(serde_json::to_string(&JobStatus::Running)?)
        .bind(serde_json::to_string(&JobStatus::Retrying)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn release_stale_jobs(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;

        let result = sqlx::query(
            "UPDATE trunkline_jobs SET status = $1, started_at = NULL WHERE status = $2 AND started_at < $3",
        )
        .bind(serde_json::to_string(&JobStatus::Pending)?)
        .bind(serde_json::to_string(&JobStatus::Running)?)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64> {
        let mut removed = 0u64;

        let result = sqlx::query(
            r#"
            DELETE FROM trunkline_jobs
            WHERE id IN (
                SELECT id FROM trunkline_jobs
                WHERE status = $1
                ORDER BY completed_at DESC
                OFFSET $2
            )
            "#,
        )
        .bind(serde_json::to_string(&JobStatus::Completed)?)
        .bind(policy.keep_completed.max(0))
        .execute(&self.pool)
        .await?;
        removed += result.rows_affected();

        let result = sqlx::query(
            r#"
            DELETE FROM trunkline_jobs
            WHERE id IN (
                SELECT id FROM trunkline_jobs
                WHERE status = $1
                ORDER BY failed_at DESC
                OFFSET $2
            )
            "#,
        )
        .bind(serde_json::to_string(&JobStatus::Failed)?)
        .bind(policy.keep_failed.max(0))
        .execute(&self.pool)
        .await?;
        removed += result.rows_affected();

        let cutoff = chrono::Duration::from_std(policy.max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        if let Some(cutoff) = cutoff {
            let result = sqlx::query(
                r#"
                DELETE FROM trunkline_jobs
                WHERE status IN ($1, $2)
                  AND COALESCE(completed_at, failed_at, created_at) < $3
                "#,
            )
            .bind(serde_json::to_string(&JobStatus::Completed)?)
            .bind(serde_json::to_string(&JobStatus::Failed)?)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
            removed += result.rows_affected();
        }

        Ok(removed)
    }
}
