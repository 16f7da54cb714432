//! Event handler registry.
//!
//! Maps event types to async handlers. The registry is total: dispatching a
//! job whose event type has no registered handler succeeds without side
//! effects, so unknown event types are acknowledged rather than retried.

pub mod call;

use crate::{Result, job::Job, store::CallStore};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

pub type JobHandler = Arc<
    dyn Fn(Job) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Registry of per-event-type handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, JobHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an event type, replacing any previous one.
    pub fn register(&mut self, event_type: impl Into<String>, handler: JobHandler) {
        self.handlers.insert(event_type.into(), handler);
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for the job's event type.
    ///
    /// Event types without a handler are treated as handled.
    pub async fn dispatch(&self, job: Job) -> Result<()> {
        match self.handlers.get(&job.event_type) {
            Some(handler) => handler(job).await,
            None => {
                debug!("Unhandled event type: {}", job.event_type);
                Ok(())
            }
        }
    }
}

/// Build the registry of call-control handlers, all writing through the
/// given call store.
pub fn call_handlers<S>(store: Arc<S>) -> HandlerRegistry
where
    S: CallStore + ?Sized + 'static,
{
    let mut registry = HandlerRegistry::new();

    registry.register(
        "call.initiated",
        Arc::new(|job| Box::pin(call::handle_call_initiated(job))),
    );

    let s = Arc::clone(&store);
    registry.register(
        "call.answered",
        Arc::new(move |job| {
            let store = Arc::clone(&s);
            Box::pin(call::handle_call_answered(store, job))
        }),
    );

    let s = Arc::clone(&store);
    registry.register(
        "call.bridged",
        Arc::new(move |job| {
            let store = Arc::clone(&s);
            Box::pin(call::handle_call_bridged(store, job))
        }),
    );

    let s = Arc::clone(&store);
    registry.register(
        "call.hangup",
        Arc::new(move |job| {
            let store = Arc::clone(&s);
            Box::pin(call::handle_call_hangup(store, job))
        }),
    );

    registry.register(
        "call.dtmf.received",
        Arc::new(|job| Box::pin(call::handle_dtmf_received(job))),
    );

    registry.register(
        "call.recording.saved",
        Arc::new(|job| Box::pin(call::handle_recording_saved(job))),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    #[test]
    fn test_job_handler_type() {
        let _handler: JobHandler = Arc::new(|_job| Box::pin(async { Ok(()) }));
    }

    #[tokio::test]
    async fn test_dispatch_runs_registered_handler() {
        let hit = Arc::new(AtomicBool::new(false));
        let hit_clone = Arc::clone(&hit);

        let mut registry = HandlerRegistry::new();
        registry.register(
            "call.answered",
            Arc::new(move |_job| {
                let hit = Arc::clone(&hit_clone);
                Box::pin(async move {
                    hit.store(true, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        let job = Job::new("call.answered", Uuid::new_v4(), json!({}));
        registry.dispatch(job).await.unwrap();
        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_event_type_succeeds() {
        let registry = HandlerRegistry::new();
        let job = Job::new("message.received", Uuid::new_v4(), json!({}));
        assert!(registry.dispatch(job).await.is_ok());
    }

    #[test]
    fn test_call_handlers_cover_call_control_events() {
        let registry = call_handlers(Arc::new(MemoryStore::new()));

        for event_type in [
            "call.initiated",
            "call.answered",
            "call.bridged",
            "call.hangup",
            "call.dtmf.received",
            "call.recording.saved",
        ] {
            assert!(registry.contains(event_type), "missing {event_type}");
        }
        assert_eq!(registry.len(), 6);
    }
}
