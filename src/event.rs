//! Webhook event wire and storage types.
//!
//! The ingestion endpoint receives an HTTP body of the form
//! `{ "data": { "event_type": ..., "id": ..., "occurred_at": ...,
//! "payload": { ... } } }`. The inner `data` object is the event
//! [`Envelope`]; it is persisted whole as the [`WebhookEvent`] payload, so
//! nothing the sender included is lost even when this service does not
//! understand it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Full HTTP body of a webhook delivery. A body without `data` is malformed
/// and rejected before anything is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookBody {
    pub data: Envelope,
}

/// One webhook event envelope as sent by the telephony provider.
///
/// `event_type` and `id` are required; everything else the sender included
/// is carried through `payload` and the flattened remainder, so
/// re-serializing an envelope reproduces the delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: String,
    /// The sender's own event id. Informational only; completion marking is
    /// keyed by the WebhookEvent row's UUID, never by this value.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<String>,
    /// Event-specific fields (call_control_id, from, to, digit, ...).
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    /// The call control id carried in the event payload, if any.
    pub fn call_control_id(&self) -> Option<&str> {
        self.payload.get("call_control_id").and_then(|v| v.as_str())
    }

    /// The call session id carried in the event payload, if any.
    pub fn call_session_id(&self) -> Option<&str> {
        self.payload.get("call_session_id").and_then(|v| v.as_str())
    }
}

/// A persisted webhook event row.
///
/// Exactly one row exists per accepted delivery. `processed` transitions
/// false→true once, when a worker finishes handling the derived job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_type: String,
    pub call_control_id: Option<String>,
    pub call_session_id: Option<String>,
    /// The full envelope as received.
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for a new webhook event. The store generates the row UUID
/// and timestamps.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub call_control_id: Option<String>,
    pub call_session_id: Option<String>,
    pub payload: serde_json::Value,
}

impl NewEvent {
    /// Builds the insert shape from a received envelope, lifting the call
    /// identifiers into their own columns and keeping the whole envelope as
    /// the payload document.
    pub fn from_envelope(envelope: &Envelope) -> crate::Result<Self> {
        Ok(Self {
            event_type: envelope.event_type.clone(),
            call_control_id: envelope.call_control_id().map(str::to_owned),
            call_session_id: envelope.call_session_id().map(str::to_owned),
            payload: serde_json::to_value(envelope)?,
        })
    }
}

/// Status of a tracked call, driven by call-control events.
///
/// Transitions run `pending → answered → bridged → ended`; handlers set the
/// status absolutely, so replaying an event leaves the same state behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Answered,
    Bridged,
    Ended,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Answered => "answered",
            CallStatus::Bridged => "bridged",
            CallStatus::Ended => "ended",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
