//! Durable storage for webhook events and call state.
//!
//! The store is split into two traits: [`EventStore`] owns the append-only
//! webhook event log and its processed flags, and [`CallStore`] exposes the
//! call-status side effects that handlers apply. The PostgreSQL
//! implementation backs both with the same pool; the in-memory
//! implementation exists for tests and supports a mock clock.

use crate::{
    Result,
    event::{CallStatus, NewEvent, WebhookEvent},
};
use async_trait::async_trait;
use uuid::Uuid;

#[cfg(feature = "postgres")]
pub mod postgres;

pub mod memory;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

pub use memory::MemoryStore;

/// Persistence operations for webhook events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists a new event with `processed = false` and returns the stored
    /// row, including its generated UUID.
    async fn insert_event(&self, event: NewEvent) -> Result<WebhookEvent>;

    /// Marks the event with the given UUID processed, stamping
    /// `processed_at`. Errors if no such event exists.
    async fn mark_processed(&self, event_id: Uuid) -> Result<()>;

    /// Fetches one event by UUID.
    async fn get_event(&self, event_id: Uuid) -> Result<Option<WebhookEvent>>;

    /// Unprocessed events older than `older_than`, oldest first. Used by the
    /// orphan sweep to find events whose enqueue never happened.
    async fn unprocessed_events_older_than(
        &self,
        older_than: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>>;

    /// Cheap connectivity check for health reporting.
    async fn ping(&self) -> Result<()>;
}

/// Call-state mutations applied by event handlers.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Sets the status of the call carrying this `call_control_id`. Returns
    /// the number of rows updated; zero is not an error, the call may simply
    /// not be tracked locally.
    async fn set_call_status(&self, call_control_id: &str, status: CallStatus) -> Result<u64>;
}
