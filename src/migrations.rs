//! Idempotent schema setup.
//!
//! Both binaries call [`create_tables`] at startup. Every statement is
//! `IF NOT EXISTS`, so repeated runs against an already-provisioned
//! database are no-ops. The `calls` table is owned by the upstream call
//! service; it is created here only so handlers have a target in
//! standalone deployments.

use crate::Result;
use sqlx::PgPool;

/// Create the event, call, and job tables plus their lookup indexes.
pub async fn create_tables(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id UUID PRIMARY KEY,
            event_type VARCHAR(100) NOT NULL,
            call_control_id VARCHAR(100),
            call_session_id VARCHAR(100),
            payload JSONB NOT NULL,
            processed BOOLEAN NOT NULL DEFAULT FALSE,
            processed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS calls (
            id UUID PRIMARY KEY,
            user_id UUID,
            phone_number VARCHAR(20) NOT NULL,
            status VARCHAR(20) NOT NULL DEFAULT 'pending',
            metadata JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trunkline_jobs (
            id UUID PRIMARY KEY,
            event_type VARCHAR(100) NOT NULL,
            event_id UUID NOT NULL,
            payload JSONB NOT NULL,
            status VARCHAR NOT NULL,
            priority INTEGER NOT NULL DEFAULT 1,
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            created_at TIMESTAMPTZ NOT NULL,
            scheduled_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            failed_at TIMESTAMPTZ,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Claim path: status + priority DESC + scheduled_at ASC.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_trunkline_jobs_status_priority_scheduled
        ON trunkline_jobs (status, priority DESC, scheduled_at ASC)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_trunkline_jobs_event_id
        ON trunkline_jobs (event_id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_trunkline_jobs_status_failed_at
        ON trunkline_jobs (status, failed_at)
        "#,
    )
    .execute(pool)
    .await?;

    // Orphan sweep scans unprocessed events by age.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_webhook_events_processed_created_at
        ON webhook_events (processed, created_at)
        "#,
    )
    .execute(pool)
    .await?;

    // Handlers look calls up by the control id buried in metadata.
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_calls_call_control_id
        ON calls ((metadata->>'call_control_id'))
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
