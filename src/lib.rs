//! # Trunkline
//!
//! A webhook-to-queue-to-worker pipeline for call telephony events, built on
//! PostgreSQL and Tokio.
//!
//! Inbound webhook deliveries are persisted first, acknowledged second, and
//! processed later by a pool of workers pulling from a priority-ordered job
//! queue. Nothing is lost between those steps: enqueue failures are repaired
//! by an orphan sweep and dead workers' claims are released for redelivery.
//!
//! ## Features
//!
//! - **Durable intake**: every accepted delivery is a `webhook_events` row
//!   before the sender sees a 200
//! - **Priority scheduling**: call-control events are classified High,
//!   Medium, or Low from their event type and served in that order
//! - **At-least-once processing**: PostgreSQL-backed queue with
//!   `FOR UPDATE SKIP LOCKED` claims, so a job is never handled twice
//!   concurrently
//! - **Retry with backoff**: failed handlers are re-scheduled with
//!   exponential backoff up to an attempt cap, then parked for inspection
//! - **Crash recovery**: stale-claim release and an orphaned-event sweep
//!   pick up work lost mid-flight
//! - **Bounded retention**: terminal jobs are kept for inspection and pruned
//!   by count and age
//! - **In-memory backends**: deterministic store and queue with a mock clock
//!   for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trunkline::{
//!     Config, WorkerPool,
//!     handlers::call_handlers,
//!     queue::PostgresQueue,
//!     store::PostgresStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!
//!     let pool = sqlx::PgPool::connect(&config.database.url).await?;
//!     trunkline::migrations::create_tables(&pool).await?;
//!
//!     let store = Arc::new(PostgresStore::new(pool.clone()));
//!     let queue = Arc::new(PostgresQueue::new(pool).with_retry_policy(config.retry_policy()));
//!     let registry = Arc::new(call_handlers(Arc::clone(&store)));
//!
//!     // Workers process whatever the webhook endpoint enqueues.
//!     let mut workers = WorkerPool::with_workers(
//!         config.worker.count,
//!         Arc::clone(&queue),
//!         Arc::clone(&store),
//!         registry,
//!     );
//!     workers.start();
//!
//!     // Serve `POST /webhooks/telnyx` and `GET /health` until ctrl-c.
//!     let addr = config.socket_addr()?;
//!     trunkline::server::run_server(store, queue, addr, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     workers.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Events
//!
//! A [`WebhookEvent`] is the durable record of one delivery: the full
//! envelope as JSON, the call control/session ids lifted into columns, and a
//! `processed` flag that flips exactly once when a handler succeeds.
//!
//! ### Jobs
//!
//! A [`Job`] is the unit of deferred work derived from one event. It carries
//! the event's row UUID, the envelope payload, a priority fixed at enqueue
//! time, and its retry bookkeeping (`attempts`, `max_attempts`,
//! `scheduled_at`).
//!
//! ### Workers
//!
//! [`Worker`]s are independent claim loops: dequeue one job, dispatch it to
//! the handler registered for its event type, mark the event processed, and
//! resolve the job as completed, retrying, or failed. A [`WorkerPool`] runs
//! several of them and drains gracefully on shutdown.
//!
//! ### Handlers
//!
//! The [`HandlerRegistry`] maps event-type strings to async handlers.
//! Unregistered types are acknowledged as no-op successes, so unknown
//! webhook traffic never clogs the queue.
//!
//! ## Feature Flags
//!
//! - `postgres` (default) - PostgreSQL store and queue backends plus the
//!   `trunkline-server` and `trunkline-worker` binaries

pub mod config;
pub mod error;
pub mod event;
pub mod handlers;
pub mod job;
pub mod priority;
pub mod queue;
pub mod retry;
pub mod server;
pub mod store;
pub mod sweep;
pub mod worker;

#[cfg(feature = "postgres")]
pub mod migrations;

pub use config::Config;
pub use error::TrunklineError;
pub use event::{CallStatus, Envelope, NewEvent, WebhookBody, WebhookEvent};
pub use handlers::{HandlerRegistry, JobHandler, call_handlers};
pub use job::{Job, JobData, JobId, JobStatus};
pub use priority::{EventPriority, PriorityError, classify};
pub use queue::{JobQueue, MemoryQueue, RetentionPolicy};
pub use retry::{JitterType, RetryPolicy, RetryStrategy};
pub use store::{CallStore, EventStore, MemoryStore};
pub use sweep::OrphanSweeper;
pub use worker::{DEFAULT_WORKER_COUNT, Worker, WorkerPool};

#[cfg(feature = "postgres")]
pub use queue::PostgresQueue;

#[cfg(feature = "postgres")]
pub use store::PostgresStore;

/// Convenient type alias for Results with [`TrunklineError`] as the error type.
///
/// This is used throughout the crate for consistent error handling.
pub type Result<T> = std::result::Result<T, TrunklineError>;
