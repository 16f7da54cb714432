//! Recovery of orphaned webhook events.
//!
//! Persisting an event and enqueuing its job are separate writes. When the
//! enqueue fails (or the process dies between the two), the event is left
//! `processed = false` with no job referencing it. The [`OrphanSweeper`]
//! periodically finds such events and enqueues a fresh job for each,
//! re-classifying priority from the stored event type.
//!
//! Events younger than the configured minimum age are left alone so the
//! sweep never races an ingest that is still in flight.

use crate::{Result, job::Job, queue::JobQueue, store::EventStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Background task that re-enqueues unprocessed events with no live job.
pub struct OrphanSweeper<Q: JobQueue, S: EventStore> {
    queue: Arc<Q>,
    store: Arc<S>,
    min_age: chrono::Duration,
    batch_size: i64,
    interval: Duration,
}

impl<Q, S> OrphanSweeper<Q, S>
where
    Q: JobQueue + 'static,
    S: EventStore + 'static,
{
    pub fn new(queue: Arc<Q>, store: Arc<S>) -> Self {
        Self {
            queue,
            store,
            min_age: chrono::Duration::seconds(60),
            batch_size: 100,
            interval: Duration::from_secs(30),
        }
    }

    /// Only events older than this are considered orphaned.
    pub fn with_min_age(mut self, min_age: chrono::Duration) -> Self {
        self.min_age = min_age;
        self
    }

    /// How often [`run`](Self::run) sweeps.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Cap on events examined per sweep.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// One sweep pass. Returns the number of jobs enqueued.
    pub async fn sweep_once(&self) -> Result<u64> {
        let events = self
            .store
            .unprocessed_events_older_than(self.min_age, self.batch_size)
            .await?;

        let mut enqueued = 0u64;
        for event in events {
            if self.queue.has_active_job(event.id).await? {
                debug!(
                    "Skipping event {} ({}): job already active",
                    event.id, event.event_type
                );
                continue;
            }

            let job = Job::new(event.event_type.clone(), event.id, event.payload.clone());
            let job_id = self.queue.enqueue(job).await?;
            debug!(
                "Re-enqueued orphaned event {} ({}) as job {}",
                event.id, event.event_type, job_id
            );
            enqueued += 1;
        }

        Ok(enqueued)
    }

    /// Sweep on an interval until the shutdown signal arrives.
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Orphan sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => {}
                        Ok(n) => info!("Orphan sweep re-enqueued {} event(s)", n),
                        Err(e) => error!("Orphan sweep failed: {}", e),
                    }
                }
            }
        }
    }
}
