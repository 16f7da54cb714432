//! In-memory implementation of event and call storage.
//!
//! Backs the same traits as the PostgreSQL store without a database
//! connection, for unit tests and local development. Time flows from a
//! [`MockClock`] so tests can control `created_at` and `processed_at`
//! timestamps deterministically.

use crate::{
    Result, TrunklineError,
    event::{CallStatus, NewEvent, WebhookEvent},
    queue::memory::MockClock,
    store::{CallStore, EventStore},
};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug)]
struct StoreState {
    /// Persisted webhook events by row ID.
    events: HashMap<Uuid, WebhookEvent>,
    /// Call status by call control ID.
    calls: HashMap<String, CallStatus>,
    clock: MockClock,
}

impl StoreState {
    fn new(clock: MockClock) -> Self {
        Self {
            events: HashMap::new(),
            calls: HashMap::new(),
            clock,
        }
    }
}

/// Event and call storage backed by process memory.
#[derive(Clone)]
pub struct MemoryStore {
    storage: Arc<RwLock<StoreState>>,
    clock: MockClock,
}

impl MemoryStore {
    /// Create a new store with a fresh clock.
    pub fn new() -> Self {
        Self::with_clock(MockClock::new())
    }

    /// Create a new store that reads time from the given clock.
    pub fn with_clock(clock: MockClock) -> Self {
        Self {
            storage: Arc::new(RwLock::new(StoreState::new(clock.clone()))),
            clock,
        }
    }

    /// Get access to the mock clock for time manipulation.
    pub fn clock(&self) -> &MockClock {
        &self.clock
    }

    /// Seed a call record, as if a call row had been created elsewhere.
    pub async fn insert_call(&self, call_control_id: impl Into<String>, status: CallStatus) {
        let mut storage = self.storage.write().await;
        storage.calls.insert(call_control_id.into(), status);
    }

    /// Look up the status of a seeded call.
    pub async fn call_status(&self, call_control_id: &str) -> Option<CallStatus> {
        let storage = self.storage.read().await;
        storage.calls.get(call_control_id).copied()
    }

    /// Count all stored events.
    pub async fn event_count(&self) -> usize {
        let storage = self.storage.read().await;
        storage.events.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: NewEvent) -> Result<WebhookEvent> {
        let mut storage = self.storage.write().await;
        let now = storage.clock.now();

        let stored = WebhookEvent {
            id: Uuid::new_v4(),
            event_type: event.event_type,
            call_control_id: event.call_control_id,
            call_session_id: event.call_session_id,
            payload: event.payload,
            processed: false,
            processed_at: None,
            created_at: now,
            updated_at: now,
        };
        storage.events.insert(stored.id, stored.clone());

        Ok(stored)
    }

    async fn mark_processed(&self, event_id: Uuid) -> Result<()> {
        let mut storage = self.storage.write().await;
        let now = storage.clock.now();

        let event = storage
            .events
            .get_mut(&event_id)
            .ok_or_else(|| TrunklineError::EventNotFound {
                id: event_id.to_string(),
            })?;
        event.processed = true;
        event.processed_at = Some(now);
        event.updated_at = now;

        Ok(())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<WebhookEvent>> {
        let storage = self.storage.read().await;
        Ok(storage.events.get(&event_id).cloned())
    }

    async fn unprocessed_events_older_than(
        &self,
        older_than: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>> {
        let storage = self.storage.read().await;
        let cutoff = storage.clock.now() - older_than;

        let mut events: Vec<WebhookEvent> = storage
            .events
            .values()
            .filter(|event| !event.processed && event.created_at < cutoff)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        events.truncate(limit.max(0) as usize);

        Ok(events)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn set_call_status(&self, call_control_id: &str, status: CallStatus) -> Result<u64> {
        let mut storage = self.storage.write().await;

        match storage.calls.get_mut(call_control_id) {
            Some(current) => {
                *current = status;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}
