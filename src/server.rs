//! HTTP server for webhook ingestion.
//!
//! The server accepts webhook deliveries, persists each one as a
//! [`WebhookEvent`](crate::event::WebhookEvent) row, enqueues a processing
//! job at the priority classified from its event type, and acknowledges with
//! `200 {"received": true}`. Acknowledgement means durability, not
//! processing: handlers run later in the worker pool.
//!
//! A delivery that cannot be persisted or enqueued is answered with
//! `500 {"error": "Internal server error"}` so the sender retries it.
//! Malformed bodies are answered with `400` and are not retried into
//! storage.

use crate::{
    Result, TrunklineError,
    event::{NewEvent, WebhookBody},
    job::{Job, JobId},
    queue::JobQueue,
    store::EventStore,
};
use serde::Serialize;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tracing::{error, info};
use uuid::Uuid;
use warp::{Filter, Reply, http::StatusCode};

#[derive(Debug, Serialize)]
struct Received {
    received: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    database: &'static str,
}

/// Persist a delivery and enqueue its processing job.
///
/// Returns the stored event's row UUID and the job id. The job carries the
/// row UUID as its `event_id`, which is what the worker marks processed on
/// completion.
pub async fn ingest_event<S, Q>(store: &S, queue: &Q, body: &WebhookBody) -> Result<(Uuid, JobId)>
where
    S: EventStore + ?Sized,
    Q: JobQueue + ?Sized,
{
    let event = store
        .insert_event(NewEvent::from_envelope(&body.data)?)
        .await?;

    let job = Job::new(event.event_type.clone(), event.id, event.payload.clone());
    let job_id = queue.enqueue(job).await?;

    info!(
        "Telnyx webhook received and queued: {} (event: {}, call_control_id: {}, call_session_id: {})",
        event.event_type,
        event.id,
        event.call_control_id.as_deref().unwrap_or("-"),
        event.call_session_id.as_deref().unwrap_or("-"),
    );

    Ok((event.id, job_id))
}

/// Build the route tree: `POST /webhooks/telnyx` and `GET /health`.
pub fn routes<S, Q>(
    store: Arc<S>,
    queue: Arc<Q>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone
where
    S: EventStore + Send + Sync + 'static,
    Q: JobQueue + Send + Sync + 'static,
{
    let webhook_store = Arc::clone(&store);
    let webhook = warp::path("webhooks")
        .and(warp::path("telnyx"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::any().map(move || Arc::clone(&webhook_store)))
        .and(warp::any().map(move || Arc::clone(&queue)))
        .and(warp::body::json())
        .and_then(receive_webhook_handler);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&store)))
        .and_then(health_handler);

    webhook.or(health)
}

async fn receive_webhook_handler<S, Q>(
    store: Arc<S>,
    queue: Arc<Q>,
    body: WebhookBody,
) -> std::result::Result<impl Reply, warp::Rejection>
where
    S: EventStore + Send + Sync,
    Q: JobQueue + Send + Sync,
{
    match ingest_event(store.as_ref(), queue.as_ref(), &body).await {
        Ok(_) => Ok(warp::reply::with_status(
            warp::reply::json(&Received { received: true }),
            StatusCode::OK,
        )),
        Err(e) => {
            error!("Error processing Telnyx webhook: {}", e);
            Ok(warp::reply::with_status(
                warp::reply::json(&ErrorBody {
                    error: "Internal server error".to_string(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

async fn health_handler<S>(store: Arc<S>) -> std::result::Result<impl Reply, warp::Rejection>
where
    S: EventStore + Send + Sync,
{
    match store.ping().await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&HealthBody {
                status: "healthy",
                database: "connected",
            }),
            StatusCode::OK,
        )),
        Err(e) => {
            error!("Health check failed: {}", e);
            Ok(warp::reply::with_status(
                warp::reply::json(&HealthBody {
                    status: "unhealthy",
                    database: "disconnected",
                }),
                StatusCode::SERVICE_UNAVAILABLE,
            ))
        }
    }
}

/// Map rejections to the error body shape the API promises.
pub async fn handle_rejection(
    err: warp::Rejection,
) -> std::result::Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        (StatusCode::BAD_REQUEST, "Invalid request body")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            error: message.to_string(),
        }),
        status,
    ))
}

/// Serve the ingestion API until the shutdown future resolves.
///
/// Connections that are mid-request when the signal arrives are given time
/// to finish before the listener closes.
pub async fn run_server<S, Q>(
    store: Arc<S>,
    queue: Arc<Q>,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()>
where
    S: EventStore + Send + Sync + 'static,
    Q: JobQueue + Send + Sync + 'static,
{
    let routes = routes(store, queue).recover(handle_rejection);

    let (bound, serving) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|e| TrunklineError::Config(format!("failed to bind {}: {}", addr, e)))?;

    info!("Webhook server listening on {}", bound);
    serving.await;
    info!("Webhook server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::WebhookEvent,
        priority::EventPriority,
        queue::memory::MemoryQueue,
        store::MemoryStore,
    };
    use async_trait::async_trait;
    use serde_json::json;

    /// Store whose writes always fail, for exercising the 500 path.
    struct FailingStore;

    #[async_trait]
    impl EventStore for FailingStore {
        async fn insert_event(&self, _event: NewEvent) -> Result<WebhookEvent> {
            Err(TrunklineError::Store {
                message: "insert failed".to_string(),
            })
        }

        async fn mark_processed(&self, _event_id: Uuid) -> Result<()> {
            Err(TrunklineError::Store {
                message: "update failed".to_string(),
            })
        }

        async fn get_event(&self, _event_id: Uuid) -> Result<Option<WebhookEvent>> {
            Ok(None)
        }

        async fn unprocessed_events_older_than(
            &self,
            _older_than: chrono::Duration,
            _limit: i64,
        ) -> Result<Vec<WebhookEvent>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<()> {
            Err(TrunklineError::Store {
                message: "connection refused".to_string(),
            })
        }
    }

    fn delivery(event_type: &str, payload: serde_json::Value) -> serde_json::Value {
        json!({
            "data": {
                "event_type": event_type,
                "id": "evt_0001",
                "occurred_at": "2024-05-01T12:00:00Z",
                "payload": payload,
            }
        })
    }

    #[tokio::test]
    async fn test_webhook_accepts_valid_delivery() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let routes = routes(Arc::clone(&store), Arc::clone(&queue));

        let res = warp::test::request()
            .method("POST")
            .path("/webhooks/telnyx")
            .json(&delivery(
                "call.answered",
                json!({"call_control_id": "cc-1", "call_session_id": "cs-1"}),
            ))
            .reply(&routes)
            .await;

        assert_eq!(res.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, json!({"received": true}));

        assert_eq!(store.event_count().await, 1);
        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.event_type, "call.answered");
        assert_eq!(job.priority, EventPriority::High);

        // The job references the stored row, not the sender's id.
        let event = store.get_event(job.event_id).await.unwrap().unwrap();
        assert_eq!(event.call_control_id.as_deref(), Some("cc-1"));
        assert!(!event.processed);
    }

    #[tokio::test]
    async fn test_webhook_store_failure_returns_500() {
        let store = Arc::new(FailingStore);
        let queue = Arc::new(MemoryQueue::new());
        let routes = routes(store, Arc::clone(&queue));

        let res = warp::test::request()
            .method("POST")
            .path("/webhooks/telnyx")
            .json(&delivery("call.answered", json!({"call_control_id": "cc-1"})))
            .reply(&routes)
            .await;

        assert_eq!(res.status(), 500);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, json!({"error": "Internal server error"}));

        // Nothing was enqueued for the failed delivery.
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_webhook_malformed_body_returns_400() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let routes = routes(Arc::clone(&store), queue).recover(handle_rejection);

        let res = warp::test::request()
            .method("POST")
            .path("/webhooks/telnyx")
            .header("content-type", "application/json")
            .body("this is not json")
            .reply(&routes)
            .await;

        assert_eq!(res.status(), 400);
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_webhook_missing_event_type_returns_400() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let routes = routes(Arc::clone(&store), queue).recover(handle_rejection);

        let res = warp::test::request()
            .method("POST")
            .path("/webhooks/telnyx")
            .json(&json!({"data": {"id": "evt_0001"}}))
            .reply(&routes)
            .await;

        assert_eq!(res.status(), 400);
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_health_reports_connected_store() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let routes = routes(store, queue);

        let res = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes)
            .await;

        assert_eq!(res.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, json!({"status": "healthy", "database": "connected"}));
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_store() {
        let store = Arc::new(FailingStore);
        let queue = Arc::new(MemoryQueue::new());
        let routes = routes(store, queue);

        let res = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes)
            .await;

        assert_eq!(res.status(), 503);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(
            body,
            json!({"status": "unhealthy", "database": "disconnected"})
        );
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let routes = routes(store, queue).recover(handle_rejection);

        let res = warp::test::request()
            .method("GET")
            .path("/nope")
            .reply(&routes)
            .await;

        assert_eq!(res.status(), 404);
    }

    #[tokio::test]
    async fn test_get_on_webhook_path_is_not_allowed() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let routes = routes(store, queue).recover(handle_rejection);

        let res = warp::test::request()
            .method("GET")
            .path("/webhooks/telnyx")
            .reply(&routes)
            .await;

        assert_eq!(res.status(), 405);
    }

    #[tokio::test]
    async fn test_ingest_event_persists_and_enqueues() {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();

        let body: WebhookBody = serde_json::from_value(delivery(
            "call.hangup",
            json!({"call_control_id": "cc-9", "hangup_cause": "normal_clearing"}),
        ))
        .unwrap();

        let (event_id, job_id) = ingest_event(&store, &queue, &body).await.unwrap();

        let event = store.get_event(event_id).await.unwrap().unwrap();
        assert_eq!(event.event_type, "call.hangup");

        let job = queue.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.event_id, event_id);
        // The queued payload is the whole envelope, so handlers can reach
        // the nested fields.
        assert_eq!(
            job.payload.get("payload").and_then(|p| p.get("hangup_cause")),
            Some(&json!("normal_clearing"))
        );
    }
}
