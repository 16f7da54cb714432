//! Priority job queue with PostgreSQL and in-memory backends.
//!
//! Queue operations are defined by the [`JobQueue`] trait. The PostgreSQL
//! backend claims jobs with `FOR UPDATE SKIP LOCKED` so that concurrent
//! workers never observe the same job; the in-memory backend mirrors those
//! semantics for tests and local development.

use crate::{
    Result,
    job::{Job, JobId},
    retry::RetryPolicy,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

#[cfg(feature = "postgres")]
pub mod postgres;

pub mod memory;

#[cfg(feature = "postgres")]
pub use postgres::PostgresQueue;

pub use memory::{MemoryQueue, MockClock};

/// How many terminal jobs to keep around, and for how long.
///
/// Completed and failed jobs are kept for inspection and pruned in the
/// background: the newest `keep_completed` completed jobs and the newest
/// `keep_failed` failed jobs survive the count-based pass, and any terminal
/// job older than `max_age` is dropped regardless of count.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    pub keep_completed: i64,
    pub keep_failed: i64,
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_completed: 100,
            keep_failed: 50,
            max_age: Duration::from_secs(3600),
        }
    }
}

/// The trait defining operations for the job queue.
///
/// Jobs are delivered highest priority first, oldest first within a priority.
/// A dequeued job is exclusively claimed: no other worker can receive it
/// unless its claim is released by [`release_stale_jobs`](JobQueue::release_stale_jobs).
/// Failing a job either reschedules it with backoff or, once its attempts are
/// exhausted, parks it as failed.
#[async_trait]
pub trait JobQueue: Send + Sync {
    // Core job operations
    /// Admit a job for delivery. The queue's retry policy supplies the
    /// attempt budget recorded on the job.
    async fn enqueue(&self, job: Job) -> Result<JobId>;
    async fn dequeue(&self) -> Result<Option<Job>>;
    async fn complete_job(&self, job_id: JobId) -> Result<()>;
    async fn fail_job(&self, job_id: JobId, error_message: &str) -> Result<()>;
    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>>;

    // Inspection
    /// Get jobs that exhausted their attempts, most recent failures first.
    async fn get_failed_jobs(&self, limit: i64) -> Result<Vec<Job>>;

    /// Count the jobs that are runnable right now.
    async fn queue_depth(&self) -> Result<u64>;

    /// Whether a pending, running, or retrying job exists for the event.
    async fn has_active_job(&self, event_id: Uuid) -> Result<bool>;

    // Maintenance
    /// Return jobs claimed longer ago than `older_than` to the queue.
    async fn release_stale_jobs(&self, older_than: chrono::Duration) -> Result<u64>;

    /// Delete terminal jobs that fall outside the retention policy.
    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64>;
}

/// Decide where a failed job goes next.
///
/// Returns the time of the next attempt, or `None` when the job has used all
/// of its attempts and must be parked as failed.
pub(crate) fn next_retry_at(
    policy: &RetryPolicy,
    attempts: i32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if attempts >= policy.max_attempts as i32 {
        return None;
    }
    let delay = policy.delay_for(attempts.max(0) as u32);
    Some(now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()))
}
