//! Workers that drain the job queue and run event handlers.
//!
//! A [`Worker`] repeatedly claims one job, dispatches it through the handler
//! registry, marks the source webhook event processed, and acknowledges the
//! job. A [`WorkerPool`] runs several workers against the same queue; the
//! queue's claim semantics guarantee they never process the same job twice
//! concurrently.
//!
//! Shutdown is graceful: the signal is honored between jobs only, so a job
//! that is mid-flight when shutdown arrives is finished and acknowledged
//! before the worker exits. Jobs lost to a crash stay claimed until
//! [`JobQueue::release_stale_jobs`] returns them to the queue.

use crate::{
    Result, TrunklineError,
    handlers::HandlerRegistry,
    job::Job,
    queue::JobQueue,
    store::EventStore,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

/// Workers started by default, matching the queue's processing concurrency.
pub const DEFAULT_WORKER_COUNT: usize = 5;

pub struct Worker<Q: JobQueue, S: EventStore> {
    queue: Arc<Q>,
    store: Arc<S>,
    registry: Arc<HandlerRegistry>,
    name: String,
    poll_interval: Duration,
}

impl<Q, S> Worker<Q, S>
where
    Q: JobQueue + 'static,
    S: EventStore + 'static,
{
    pub fn new(queue: Arc<Q>, store: Arc<S>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            queue,
            store,
            registry,
            name: "worker".to_string(),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until a shutdown signal arrives.
    ///
    /// The signal is only checked while waiting for a claim; a job claimed
    /// before the signal is processed to completion.
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!("Worker {} started", self.name);

        loop {
            let claimed = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Worker {} shutting down", self.name);
                    break;
                }
                claimed = self.claim_next() => claimed,
            };

            if let Some(job) = claimed {
                self.process_job(job).await;
            }
        }

        Ok(())
    }

    /// Claim the next runnable job, sleeping through empty polls.
    async fn claim_next(&self) -> Option<Job> {
        match self.queue.dequeue().await {
            Ok(Some(job)) => Some(job),
            Ok(None) => {
                sleep(self.poll_interval).await;
                None
            }
            Err(e) => {
                error!("Error dequeuing job: {}", e);
                sleep(self.poll_interval).await;
                None
            }
        }
    }

    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        let event_id = job.event_id;
        let event_type = job.event_type.clone();

        debug!("Processing webhook event: {} (id: {})", event_type, event_id);

        // The source event is marked processed before the job is
        // acknowledged, so a crash between the two redelivers the job
        // rather than losing the completion.
        let outcome = match self.registry.dispatch(job.clone()).await {
            Ok(()) => self.store.mark_processed(event_id).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.queue.complete_job(job_id).await {
                    error!("Failed to acknowledge job {}: {}", job_id, e);
                    return;
                }
                debug!("Successfully processed webhook event: {}", event_type);
            }
            Err(e) => {
                let error_message = e.to_string();
                error!("Job {} failed: {}", job_id, error_message);
                if job.attempts_exhausted() {
                    warn!(
                        "Job {} used all {} attempts, parking as failed",
                        job_id, job.max_attempts
                    );
                }
                if let Err(e) = self.queue.fail_job(job_id, &error_message).await {
                    error!("Failed to record failure for job {}: {}", job_id, e);
                }
            }
        }
    }
}

pub struct WorkerPool<Q: JobQueue, S: EventStore> {
    workers: Vec<Worker<Q, S>>,
    shutdown_tx: Vec<mpsc::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl<Q, S> WorkerPool<Q, S>
where
    Q: JobQueue + 'static,
    S: EventStore + 'static,
{
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            shutdown_tx: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Build a pool of `size` workers sharing one queue, store, and registry.
    pub fn with_workers(
        size: usize,
        queue: Arc<Q>,
        store: Arc<S>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let mut pool = Self::new();
        for i in 0..size {
            pool.add_worker(
                Worker::new(Arc::clone(&queue), Arc::clone(&store), Arc::clone(&registry))
                    .with_name(format!("worker-{}", i + 1)),
            );
        }
        pool
    }

    pub fn add_worker(&mut self, worker: Worker<Q, S>) {
        self.workers.push(worker);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len() + self.handles.len()
    }

    /// Spawn every worker onto the runtime.
    pub fn start(&mut self) {
        info!("Starting worker pool with {} workers", self.workers.len());

        for worker in self.workers.drain(..) {
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            self.shutdown_tx.push(shutdown_tx);

            let handle = tokio::spawn(async move {
                if let Err(e) = worker.run(shutdown_rx).await {
                    error!("Worker error: {}", e);
                }
            });
            self.handles.push(handle);
        }
    }

    /// Signal every worker and wait for in-flight jobs to finish.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down worker pool");

        for tx in &self.shutdown_tx {
            if tx.send(()).await.is_err() {
                warn!("Failed to send shutdown signal to worker");
            }
        }

        for handle in self.handles.drain(..) {
            handle.await.map_err(|e| TrunklineError::Worker {
                message: format!("Worker task failed: {}", e),
            })?;
        }
        self.shutdown_tx.clear();

        Ok(())
    }
}

impl<Q, S> Default for WorkerPool<Q, S>
where
    Q: JobQueue + 'static,
    S: EventStore + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{CallStatus, NewEvent},
        handlers::call_handlers,
        job::JobStatus,
        queue::memory::{MemoryQueue, MockClock},
        store::MemoryStore,
    };
    use serde_json::json;
    use uuid::Uuid;

    struct Fixture {
        queue: Arc<MemoryQueue>,
        store: Arc<MemoryStore>,
        worker: Worker<MemoryQueue, MemoryStore>,
        clock: MockClock,
    }

    fn fixture() -> Fixture {
        let clock = MockClock::new();
        let queue = Arc::new(MemoryQueue::with_clock(clock.clone()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let registry = Arc::new(call_handlers(Arc::clone(&store)));
        let worker = Worker::new(Arc::clone(&queue), Arc::clone(&store), registry)
            .with_poll_interval(Duration::from_millis(10));
        Fixture {
            queue,
            store,
            worker,
            clock,
        }
    }

    /// Persist an event and enqueue its job, the way ingestion does.
    async fn ingest(fx: &Fixture, event_type: &str, payload: serde_json::Value) -> (Uuid, Uuid) {
        let call_control_id = payload
            .get("call_control_id")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        let envelope = json!({
            "event_type": event_type,
            "id": "evt_0001",
            "payload": payload,
        });
        let event = fx
            .store
            .insert_event(NewEvent {
                event_type: event_type.to_string(),
                call_control_id,
                call_session_id: None,
                payload: envelope.clone(),
            })
            .await
            .unwrap();
        let job = Job::new(event_type, event.id, envelope);
        let job_id = fx.queue.enqueue(job).await.unwrap();
        (event.id, job_id)
    }

    #[tokio::test]
    async fn test_successful_job_marks_event_and_completes() {
        let fx = fixture();
        fx.store.insert_call("cc-1", CallStatus::Pending).await;
        let (event_id, job_id) =
            ingest(&fx, "call.answered", json!({"call_control_id": "cc-1"})).await;

        let job = fx.queue.dequeue().await.unwrap().unwrap();
        fx.worker.process_job(job).await;

        let event = fx.store.get_event(event_id).await.unwrap().unwrap();
        assert!(event.processed);

        let job = fx.queue.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(fx.store.call_status("cc-1").await, Some(CallStatus::Answered));
    }

    #[tokio::test]
    async fn test_unregistered_event_type_is_acknowledged() {
        let fx = fixture();
        let (event_id, job_id) = ingest(&fx, "message.received", json!({"text": "hi"})).await;

        let job = fx.queue.dequeue().await.unwrap().unwrap();
        fx.worker.process_job(job).await;

        assert!(fx.store.get_event(event_id).await.unwrap().unwrap().processed);
        assert_eq!(
            fx.queue.get_job(job_id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_handler_error_schedules_retry() {
        let fx = fixture();
        // call.answered without its required call_control_id.
        let (event_id, job_id) = ingest(&fx, "call.answered", json!({})).await;

        let job = fx.queue.dequeue().await.unwrap().unwrap();
        fx.worker.process_job(job).await;

        let job = fx.queue.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.attempts, 1);
        assert!(job.error_message.unwrap().contains("call.answered"));

        // The source event stays unprocessed until a successful attempt.
        assert!(!fx.store.get_event(event_id).await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn test_job_parks_as_failed_after_three_attempts() {
        let fx = fixture();
        let (event_id, job_id) = ingest(&fx, "call.answered", json!({})).await;

        for _ in 0..3 {
            let job = fx.queue.dequeue().await.unwrap().unwrap();
            fx.worker.process_job(job).await;
            fx.clock.advance(chrono::Duration::seconds(10));
        }

        let job = fx.queue.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert!(!fx.store.get_event(event_id).await.unwrap().unwrap().processed);
        assert!(fx.queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_source_event_fails_the_job() {
        let fx = fixture();
        // Job references an event row that was never persisted.
        let job = Job::new(
            "call.initiated",
            Uuid::new_v4(),
            json!({
                "event_type": "call.initiated",
                "id": "evt_0002",
                "payload": {"from": "+15550001111", "to": "+15552223333"},
            }),
        );
        let job_id = fx.queue.enqueue(job).await.unwrap();

        let job = fx.queue.dequeue().await.unwrap().unwrap();
        fx.worker.process_job(job).await;

        let job = fx.queue.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
    }

    #[tokio::test]
    async fn test_worker_run_stops_on_shutdown_signal() {
        let fx = fixture();
        fx.store.insert_call("cc-1", CallStatus::Pending).await;
        let (event_id, _) = ingest(&fx, "call.answered", json!({"call_control_id": "cc-1"})).await;

        let queue = Arc::clone(&fx.queue);
        let store = Arc::clone(&fx.store);
        let worker = fx.worker;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        // Wait for the job to be processed, then stop the worker.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.get_event(event_id).await.unwrap().unwrap().processed {
                    break;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(queue.job_count(JobStatus::Completed).await, 1);
    }

    #[tokio::test]
    async fn test_pool_processes_jobs_across_workers() {
        let clock = MockClock::new();
        let queue = Arc::new(MemoryQueue::with_clock(clock.clone()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let registry = Arc::new(call_handlers(Arc::clone(&store)));

        let mut pool = WorkerPool::new();
        for i in 0..3 {
            pool.add_worker(
                Worker::new(Arc::clone(&queue), Arc::clone(&store), Arc::clone(&registry))
                    .with_name(format!("worker-{}", i + 1))
                    .with_poll_interval(Duration::from_millis(5)),
            );
        }
        assert_eq!(pool.worker_count(), 3);

        let mut event_ids = Vec::new();
        for n in 0..10 {
            let envelope = json!({
                "event_type": "call.dtmf.received",
                "id": format!("evt_{n:04}"),
                "payload": {"call_control_id": "cc-1", "digit": "5"},
            });
            let event = store
                .insert_event(NewEvent {
                    event_type: "call.dtmf.received".to_string(),
                    call_control_id: Some("cc-1".to_string()),
                    call_session_id: None,
                    payload: envelope.clone(),
                })
                .await
                .unwrap();
            queue
                .enqueue(Job::new("call.dtmf.received", event.id, envelope))
                .await
                .unwrap();
            event_ids.push(event.id);
        }

        pool.start();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if queue.job_count(JobStatus::Completed).await == 10 {
                    break;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        pool.shutdown().await.unwrap();

        for event_id in event_ids {
            assert!(store.get_event(event_id).await.unwrap().unwrap().processed);
        }
    }

    #[tokio::test]
    async fn test_pool_with_workers_builder() {
        let queue = Arc::new(MemoryQueue::new());
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(call_handlers(Arc::clone(&store)));

        let pool = WorkerPool::with_workers(DEFAULT_WORKER_COUNT, queue, store, registry);
        assert_eq!(pool.worker_count(), DEFAULT_WORKER_COUNT);
    }
}
