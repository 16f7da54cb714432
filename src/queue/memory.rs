//! In-memory implementation of the job queue.
//!
//! This module provides a [`MemoryQueue`] that implements the [`JobQueue`]
//! trait entirely in memory, making it ideal for unit tests and local
//! development without a database connection. It delivers jobs in the same
//! order as the PostgreSQL backend and supports time manipulation through
//! [`MockClock`] for testing delayed retries.
//!
//! # Examples
//!
//! ```rust
//! use trunkline::queue::{JobQueue, memory::MemoryQueue};
//! use trunkline::Job;
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = MemoryQueue::new();
//!
//! let job = Job::new("call.answered", Uuid::new_v4(), json!({"call_control_id": "cc-1"}));
//! let job_id = queue.enqueue(job).await?;
//!
//! if let Some(job) = queue.dequeue().await? {
//!     assert_eq!(job.id, job_id);
//!     queue.complete_job(job.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::{
    Result, TrunklineError,
    job::{Job, JobId, JobStatus},
    queue::{JobQueue, RetentionPolicy, next_retry_at},
    retry::RetryPolicy,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Mock clock for controlling time in tests.
///
/// The clock is shared by cloning: every clone observes the same time, so a
/// test can hold one handle while the queue holds another.
///
/// # Examples
///
/// ## Basic time manipulation
///
/// ```rust
/// use trunkline::queue::memory::MockClock;
/// use chrono::Duration;
///
/// let clock = MockClock::new();
/// let before = clock.now();
///
/// clock.advance(Duration::hours(1));
///
/// assert_eq!((clock.now() - before).num_hours(), 1);
/// ```
///
/// ## Testing delayed jobs
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use trunkline::queue::{JobQueue, memory::{MemoryQueue, MockClock}};
/// use trunkline::Job;
/// use serde_json::json;
/// use chrono::Duration;
/// use uuid::Uuid;
///
/// let clock = MockClock::new();
/// let queue = MemoryQueue::with_clock(clock.clone());
///
/// let job = Job::new("call.hangup", Uuid::new_v4(), json!({}))
///     .with_delay(Duration::minutes(2));
/// queue.enqueue(job).await?;
///
/// // Not runnable until its scheduled time arrives.
/// assert!(queue.dequeue().await?.is_none());
///
/// clock.advance(Duration::minutes(2));
/// assert!(queue.dequeue().await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MockClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current time.
    pub fn new() -> Self {
        Self {
            current_time: Arc::new(Mutex::new(Utc::now())),
        }
    }

    /// Get the current mock time.
    pub fn now(&self) -> DateTime<Utc> {
        *self.current_time.lock().unwrap()
    }

    /// Advance the mock time by the given duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = self.current_time.lock().unwrap();
        *time += duration;
    }

    /// Set the mock time to a specific instant.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *self.current_time.lock().unwrap() = time;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory storage for the queue.
#[derive(Debug)]
struct Storage {
    /// All jobs stored by ID.
    jobs: HashMap<JobId, Job>,
    /// Enqueue order, used to break ties between equal scheduled times.
    seqs: HashMap<JobId, u64>,
    next_seq: u64,
    clock: MockClock,
}

impl Storage {
    fn new(clock: MockClock) -> Self {
        Self {
            jobs: HashMap::new(),
            seqs: HashMap::new(),
            next_seq: 0,
            clock,
        }
    }

    fn seq_of(&self, job_id: JobId) -> u64 {
        self.seqs.get(&job_id).copied().unwrap_or(u64::MAX)
    }

    fn is_runnable(&self, job: &Job, now: DateTime<Utc>) -> bool {
        matches!(job.status, JobStatus::Pending | JobStatus::Retrying) && job.scheduled_at <= now
    }

    /// Pick the next job: highest priority first, then oldest scheduled time,
    /// then enqueue order.
    fn next_runnable(&self) -> Option<JobId> {
        let now = self.clock.now();
        self.jobs
            .values()
            .filter(|job| self.is_runnable(job, now))
            .max_by_key(|job| {
                (
                    job.priority.as_i32(),
                    Reverse(job.scheduled_at),
                    Reverse(self.seq_of(job.id)),
                )
            })
            .map(|job| job.id)
    }

    fn job_mut(&mut self, job_id: JobId) -> Result<&mut Job> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| TrunklineError::JobNotFound {
                id: job_id.to_string(),
            })
    }
}

/// Queue backed by process memory.
///
/// Mirrors the claim, retry, and retention semantics of the PostgreSQL
/// backend. Use [`MemoryQueue::with_clock`] to drive scheduled times from a
/// [`MockClock`] in tests.
#[derive(Clone)]
pub struct MemoryQueue {
    storage: Arc<RwLock<Storage>>,
    clock: MockClock,
    retry_policy: RetryPolicy,
}

impl MemoryQueue {
    /// Create a new queue with a fresh clock and the default retry policy.
    pub fn new() -> Self {
        Self::with_clock(MockClock::new())
    }

    /// Create a new queue that reads time from the given clock.
    pub fn with_clock(clock: MockClock) -> Self {
        Self {
            storage: Arc::new(RwLock::new(Storage::new(clock.clone()))),
            clock,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy applied by [`JobQueue::fail_job`].
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Get access to the mock clock for time manipulation.
    pub fn clock(&self) -> &MockClock {
        &self.clock
    }

    /// Count jobs currently in the given status.
    pub async fn job_count(&self, status: JobStatus) -> usize {
        let storage = self.storage.read().await;
        storage.jobs.values().filter(|j| j.status == status).count()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, mut job: Job) -> Result<JobId> {
        let mut storage = self.storage.write().await;

        // Rebase timestamps onto the mock clock, preserving any delay the
        // job was created with.
        let now = storage.clock.now();
        let delay = job.scheduled_at - job.created_at;
        job.created_at = now;
        job.scheduled_at = now + delay;

        // The queue's retry policy owns the attempt budget.
        job.max_attempts = self.retry_policy.max_attempts as i32;

        let seq = storage.next_seq;
        storage.next_seq += 1;
        storage.seqs.insert(job.id, seq);
        storage.jobs.insert(job.id, job.clone());

        Ok(job.id)
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        let mut storage = self.storage.write().await;

        if let Some(job_id) = storage.next_runnable() {
            let now = storage.clock.now();
            let job = storage.job_mut(job_id)?;
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            job.attempts += 1;
            return Ok(Some(job.clone()));
        }

        Ok(None)
    }

    async fn complete_job(&self, job_id: JobId) -> Result<()> {
        let mut storage = self.storage.write().await;
        let now = storage.clock.now();

        let job = storage.job_mut(job_id)?;
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);

        Ok(())
    }

    async fn fail_job(&self, job_id: JobId, error_message: &str) -> Result<()> {
        let mut storage = self.storage.write().await;
        let now = storage.clock.now();
        let policy = self.retry_policy.clone();

        let job = storage.job_mut(job_id)?;
        job.error_message = Some(error_message.to_string());

        match next_retry_at(&policy, job.attempts, now) {
            Some(retry_at) => {
                job.status = JobStatus::Retrying;
                job.scheduled_at = retry_at;
                job.started_at = None;
            }
            None => {
                job.status = JobStatus::Failed;
                job.failed_at = Some(now);
            }
        }

        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let storage = self.storage.read().await;
        Ok(storage.jobs.get(&job_id).cloned())
    }

    async fn get_failed_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let storage = self.storage.read().await;

        let mut failed: Vec<Job> = storage
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        failed.truncate(limit.max(0) as usize);

        Ok(failed)
    }

    async fn queue_depth(&self) -> Result<u64> {
        let storage = self.storage.read().await;
        let now = storage.clock.now();

        Ok(storage
            .jobs
            .values()
            .filter(|job| storage.is_runnable(job, now))
            .count() as u64)
    }

    async fn has_active_job(&self, event_id: Uuid) -> Result<bool> {
        let storage = self.storage.read().await;

        Ok(storage.jobs.values().any(|job| {
            job.event_id == event_id
                && matches!(
                    job.status,
                    JobStatus::Pending | JobStatus::Running | JobStatus::Retrying
                )
        }))
    }

    async fn release_stale_jobs(&self, older_than: chrono::Duration) -> Result<u64> {
        let mut storage = self.storage.write().await;
        let cutoff = storage.clock.now() - older_than;

        let mut released = 0u64;
        for job in storage.jobs.values_mut() {
            if job.status == JobStatus::Running
                && job.started_at.is_some_and(|started| started < cutoff)
            {
                job.status = JobStatus::Pending;
                job.started_at = None;
                released += 1;
            }
        }

        Ok(released)
    }

    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64> {
        let mut storage = self.storage.write().await;
        let now = storage.clock.now();
        let mut doomed: HashSet<JobId> = HashSet::new();

        let mut completed: Vec<(JobId, DateTime<Utc>)> = storage
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Completed)
            .map(|job| (job.id, job.completed_at.unwrap_or(job.created_at)))
            .collect();
        completed.sort_by(|a, b| b.1.cmp(&a.1));
        doomed.extend(
            completed
                .iter()
                .skip(policy.keep_completed.max(0) as usize)
                .map(|(id, _)| *id),
        );

        let mut failed: Vec<(JobId, DateTime<Utc>)> = storage
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Failed)
            .map(|job| (job.id, job.failed_at.unwrap_or(job.created_at)))
            .collect();
        failed.sort_by(|a, b| b.1.cmp(&a.1));
        doomed.extend(
            failed
                .iter()
                .skip(policy.keep_failed.max(0) as usize)
                .map(|(id, _)| *id),
        );

        let cutoff = chrono::Duration::from_std(policy.max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));
        if let Some(cutoff) = cutoff {
            doomed.extend(
                storage
                    .jobs
                    .values()
                    .filter(|job| {
                        job.status.is_terminal()
                            && job.completed_at.or(job.failed_at).unwrap_or(job.created_at)
                                < cutoff
                    })
                    .map(|job| job.id),
            );
        }

        for job_id in &doomed {
            storage.jobs.remove(job_id);
            storage.seqs.remove(job_id);
        }

        Ok(doomed.len() as u64)
    }
}
