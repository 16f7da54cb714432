//! Handlers for call-control events.
//!
//! Each handler deserializes the fields it needs from the event payload and
//! fails the job if a required field is missing. Status updates are written
//! absolutely, so handling the same event twice leaves the same state
//! behind. An update that matches no call record is not an error: events
//! can arrive for calls this system never created.

use crate::{
    Result, TrunklineError,
    event::CallStatus,
    job::Job,
    store::CallStore,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct InitiatedFields {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct ControlFields {
    call_control_id: String,
}

#[derive(Debug, Deserialize)]
struct HangupFields {
    call_control_id: String,
    #[serde(default)]
    hangup_cause: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DtmfFields {
    call_control_id: String,
    digit: String,
}

#[derive(Debug, Deserialize)]
struct RecordingFields {
    call_control_id: String,
    recording_id: String,
    #[serde(default)]
    recording_url: Option<String>,
}

/// Deserialize the event-specific fields nested under the envelope's
/// `payload` key.
fn event_fields<T>(job: &Job) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let inner = job
        .payload
        .get("payload")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    serde_json::from_value(inner).map_err(|err| TrunklineError::Handler {
        message: format!("{}: {}", job.event_type, err),
    })
}

pub async fn handle_call_initiated(job: Job) -> Result<()> {
    let fields: InitiatedFields = event_fields(&job)?;
    info!("Call initiated from {} to {}", fields.from, fields.to);
    Ok(())
}

pub async fn handle_call_answered<S>(store: Arc<S>, job: Job) -> Result<()>
where
    S: CallStore + ?Sized,
{
    let fields: ControlFields = event_fields(&job)?;

    let updated = store
        .set_call_status(&fields.call_control_id, CallStatus::Answered)
        .await?;
    if updated == 0 {
        debug!("No call record for {}", fields.call_control_id);
    }
    info!("Call answered: {}", fields.call_control_id);

    Ok(())
}

pub async fn handle_call_bridged<S>(store: Arc<S>, job: Job) -> Result<()>
where
    S: CallStore + ?Sized,
{
    let fields: ControlFields = event_fields(&job)?;

    let updated = store
        .set_call_status(&fields.call_control_id, CallStatus::Bridged)
        .await?;
    if updated == 0 {
        debug!("No call record for {}", fields.call_control_id);
    }
    info!("Call bridged: {}", fields.call_control_id);

    Ok(())
}

pub async fn handle_call_hangup<S>(store: Arc<S>, job: Job) -> Result<()>
where
    S: CallStore + ?Sized,
{
    let fields: HangupFields = event_fields(&job)?;

    let updated = store
        .set_call_status(&fields.call_control_id, CallStatus::Ended)
        .await?;
    if updated == 0 {
        debug!("No call record for {}", fields.call_control_id);
    }
    info!(
        "Call ended: {}, cause: {}",
        fields.call_control_id,
        fields.hangup_cause.as_deref().unwrap_or("unknown")
    );

    Ok(())
}

pub async fn handle_dtmf_received(job: Job) -> Result<()> {
    let fields: DtmfFields = event_fields(&job)?;
    info!(
        "DTMF received: {} on call {}",
        fields.digit, fields.call_control_id
    );
    Ok(())
}

pub async fn handle_recording_saved(job: Job) -> Result<()> {
    let fields: RecordingFields = event_fields(&job)?;
    info!(
        "Recording saved: {} for call {}",
        fields.recording_id, fields.call_control_id
    );
    if let Some(url) = &fields.recording_url {
        debug!("Recording {} available at {}", fields.recording_id, url);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use uuid::Uuid;

    fn job_for(event_type: &str, payload: serde_json::Value) -> Job {
        Job::new(
            event_type,
            Uuid::new_v4(),
            json!({
                "event_type": event_type,
                "id": "evt_0001",
                "payload": payload,
            }),
        )
    }

    #[tokio::test]
    async fn test_call_initiated_logs_without_store_writes() {
        let job = job_for(
            "call.initiated",
            json!({"call_control_id": "cc-1", "from": "+15550001111", "to": "+15552223333"}),
        );
        assert!(handle_call_initiated(job).await.is_ok());
    }

    #[tokio::test]
    async fn test_call_initiated_requires_from_and_to() {
        let job = job_for("call.initiated", json!({"from": "+15550001111"}));
        let err = handle_call_initiated(job).await.unwrap_err();
        assert!(matches!(err, TrunklineError::Handler { .. }));
    }

    #[tokio::test]
    async fn test_call_answered_updates_call_status() {
        let store = Arc::new(MemoryStore::new());
        store.insert_call("cc-1", CallStatus::Pending).await;

        let job = job_for("call.answered", json!({"call_control_id": "cc-1"}));
        handle_call_answered(Arc::clone(&store), job).await.unwrap();

        assert_eq!(store.call_status("cc-1").await, Some(CallStatus::Answered));
    }

    #[tokio::test]
    async fn test_call_answered_without_call_record_succeeds() {
        let store = Arc::new(MemoryStore::new());

        let job = job_for("call.answered", json!({"call_control_id": "cc-unknown"}));
        assert!(handle_call_answered(store, job).await.is_ok());
    }

    #[tokio::test]
    async fn test_call_answered_missing_call_control_id_fails() {
        let store = Arc::new(MemoryStore::new());

        let job = job_for("call.answered", json!({"call_session_id": "cs-1"}));
        let err = handle_call_answered(store, job).await.unwrap_err();
        assert!(matches!(err, TrunklineError::Handler { .. }));
    }

    #[tokio::test]
    async fn test_call_bridged_updates_call_status() {
        let store = Arc::new(MemoryStore::new());
        store.insert_call("cc-1", CallStatus::Answered).await;

        let job = job_for("call.bridged", json!({"call_control_id": "cc-1"}));
        handle_call_bridged(Arc::clone(&store), job).await.unwrap();

        assert_eq!(store.call_status("cc-1").await, Some(CallStatus::Bridged));
    }

    #[tokio::test]
    async fn test_call_hangup_sets_ended_with_cause() {
        let store = Arc::new(MemoryStore::new());
        store.insert_call("cc-1", CallStatus::Bridged).await;

        let job = job_for(
            "call.hangup",
            json!({"call_control_id": "cc-1", "hangup_cause": "normal_clearing"}),
        );
        handle_call_hangup(Arc::clone(&store), job).await.unwrap();

        assert_eq!(store.call_status("cc-1").await, Some(CallStatus::Ended));
    }

    #[tokio::test]
    async fn test_call_hangup_cause_is_optional() {
        let store = Arc::new(MemoryStore::new());
        store.insert_call("cc-1", CallStatus::Answered).await;

        let job = job_for("call.hangup", json!({"call_control_id": "cc-1"}));
        handle_call_hangup(Arc::clone(&store), job).await.unwrap();

        assert_eq!(store.call_status("cc-1").await, Some(CallStatus::Ended));
    }

    #[tokio::test]
    async fn test_dtmf_requires_digit() {
        let ok = job_for(
            "call.dtmf.received",
            json!({"call_control_id": "cc-1", "digit": "5"}),
        );
        assert!(handle_dtmf_received(ok).await.is_ok());

        let missing = job_for("call.dtmf.received", json!({"call_control_id": "cc-1"}));
        assert!(handle_dtmf_received(missing).await.is_err());
    }

    #[tokio::test]
    async fn test_recording_saved_requires_recording_id() {
        let ok = job_for(
            "call.recording.saved",
            json!({
                "call_control_id": "cc-1",
                "recording_id": "rec-9",
                "recording_url": "https://example.com/rec-9.mp3",
            }),
        );
        assert!(handle_recording_saved(ok).await.is_ok());

        let missing = job_for(
            "call.recording.saved",
            json!({"call_control_id": "cc-1"}),
        );
        assert!(handle_recording_saved(missing).await.is_err());
    }

    #[tokio::test]
    async fn test_handlers_tolerate_missing_payload_key() {
        let job = Job::new("call.answered", Uuid::new_v4(), json!({"id": "evt_1"}));
        let store = Arc::new(MemoryStore::new());
        assert!(handle_call_answered(store, job).await.is_err());
    }
}
