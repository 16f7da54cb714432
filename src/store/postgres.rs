//! PostgreSQL-backed event and call storage.

use crate::{
    Result, TrunklineError,
    event::{CallStatus, NewEvent, WebhookEvent},
    store::{CallStore, EventStore},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Row representation of a persisted webhook event.
#[derive(sqlx::FromRow)]
struct EventRow {
    pub id: Uuid,
    pub event_type: String,
    pub call_control_id: Option<String>,
    pub call_session_id: Option<String>,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EventRow> for WebhookEvent {
    fn from(row: EventRow) -> Self {
        WebhookEvent {
            id: row.id,
            event_type: row.event_type,
            call_control_id: row.call_control_id,
            call_session_id: row.call_session_id,
            payload: row.payload,
            processed: row.processed,
            processed_at: row.processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Event and call storage backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn insert_event(&self, event: NewEvent) -> Result<WebhookEvent> {
        let now = Utc::now();
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

        sqlx::query(
            r#"
            INSERT INTO webhook_events
                (id, event_type, call_control_id, call_session_id, payload, processed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(stored.id)
        .bind(&stored.event_type)
        .bind(&stored.call_control_id)
        .bind(&stored.call_session_id)
        .bind(&stored.payload)
        .bind(stored.processed)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn mark_processed(&self, event_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE webhook_events SET processed = TRUE, processed_at = $1, updated_at = $1 WHERE id = $2",
        )
        .bind(now)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrunklineError::EventNotFound {
                id: event_id.to_string(),
            });
        }

        Ok(())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<WebhookEvent>> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, call_control_id, call_session_id, payload,
                   processed, processed_at, created_at, updated_at
            FROM webhook_events
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WebhookEvent::from))
    }

    async fn unprocessed_events_older_than(
        &self,
        older_than: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>> {
        let cutoff = Utc::now() - older_than;

        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, event_type, call_control_id, call_session_id, payload,
                   processed, processed_at, created_at, updated_at
            FROM webhook_events
            WHERE processed = FALSE AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WebhookEvent::from).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CallStore for PostgresStore {
    async fn set_call_status(&self, call_control_id: &str, status: CallStatus) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE calls SET status = $1, updated_at = $2 WHERE metadata->>'call_control_id' = $3",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(call_control_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
