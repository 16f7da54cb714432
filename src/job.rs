//! Job types for the webhook processing queue.
//!
//! A [`Job`] is the queued unit of work derived from one persisted webhook
//! event: it carries the event type, the UUID of the WebhookEvent row it
//! references, and the full event envelope. Priority is fixed at
//! construction from the static classification of the event type and never
//! changes afterward.

use crate::priority::{EventPriority, classify};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    /// Terminal statuses are never redelivered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// The serialized form of a job's data, matching the wire shape consumed by
/// workers: `{ "eventType": ..., "eventId": ..., "payload": ... }`.
///
/// This is what the queue backend stores in the job's payload column, so a
/// job row is self-describing independent of the typed columns beside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub event_type: String,
    pub event_id: Uuid,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub event_type: String,
    /// UUID of the WebhookEvent row this job processes.
    pub event_id: Uuid,
    /// Full event envelope as received at ingestion.
    pub payload: serde_json::Value,
    pub priority: EventPriority,
    pub status: JobStatus,
    pub attempts: i32,
    /// Attempt budget; stamped from the queue's retry policy at enqueue.
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    /// Creates a job for a persisted webhook event, immediately eligible for
    /// delivery. Priority is classified from the event type.
    pub fn new(event_type: impl Into<String>, event_id: Uuid, payload: serde_json::Value) -> Self {
        let event_type = event_type.into();
        let priority = classify(&event_type);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_type,
            event_id,
            payload,
            priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            created_at: now,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            error_message: None,
        }
    }

    /// Defers first delivery by `delay`.
    pub fn with_delay(mut self, delay: chrono::Duration) -> Self {
        self.scheduled_at = self.created_at + delay;
        self
    }

    /// The job's data in its wire shape.
    pub fn data(&self) -> JobData {
        JobData {
            event_type: self.event_type.clone(),
            event_id: self.event_id,
            payload: self.payload.clone(),
        }
    }

    /// True once the attempt count has reached the cap; the next failure is
    /// terminal.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_job_classifies_priority() {
        let event_id = Uuid::new_v4();
        let job = Job::new("call.initiated", event_id, json!({"event_type": "call.initiated"}));

        assert_eq!(job.priority, EventPriority::High);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.event_id, event_id);
        assert_eq!(job.scheduled_at, job.created_at);

        let medium = Job::new("call.dtmf.received", event_id, json!({}));
        assert_eq!(medium.priority, EventPriority::Medium);

        let low = Job::new("unknown.custom", event_id, json!({}));
        assert_eq!(low.priority, EventPriority::Low);
    }

    #[test]
    fn with_delay_defers_visibility() {
        let job = Job::new("call.hangup", Uuid::new_v4(), json!({}))
            .with_delay(chrono::Duration::seconds(30));

        assert_eq!(job.scheduled_at, job.created_at + chrono::Duration::seconds(30));
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let event_id = Uuid::new_v4();
        let envelope = json!({
            "event_type": "call.answered",
            "id": "evt_123",
            "payload": {"call_control_id": "cc_1"}
        });
        let job = Job::new("call.answered", event_id, envelope.clone());

        let wire = serde_json::to_value(job.data()).unwrap();
        assert_eq!(
            wire,
            json!({
                "eventType": "call.answered",
                "eventId": event_id.to_string(),
                "payload": envelope,
            })
        );
    }

    #[test]
    fn wire_shape_roundtrip() {
        let job = Job::new("call.bridged", Uuid::new_v4(), json!({"k": "v"}));
        let encoded = serde_json::to_string(&job.data()).unwrap();
        let decoded: JobData = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, job.data());
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn attempts_exhausted_at_cap() {
        let mut job = Job::new("call.hangup", Uuid::new_v4(), json!({}));
        assert!(!job.attempts_exhausted());
        job.attempts = 2;
        assert!(!job.attempts_exhausted());
        job.attempts = 3;
        assert!(job.attempts_exhausted());
    }
}
