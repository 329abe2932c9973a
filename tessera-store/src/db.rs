use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            kind VARCHAR(20) NOT NULL,
            owner_id VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            input JSONB NOT NULL,
            output JSONB,
            error JSONB,
            parent_id UUID REFERENCES jobs(id) ON DELETE CASCADE,
            child_ids UUID[] NOT NULL DEFAULT '{}',
            batch_index INTEGER,
            max_concurrent INTEGER,
            progress JSONB,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            revision BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Owner listings, newest first
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_owner_created ON jobs(owner_id, created_at DESC, id DESC)",
    )
    .execute(pool)
    .await?;

    // Batch children in submission order
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_parent_index ON jobs(parent_id, batch_index) WHERE parent_id IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    // Create dispatch queue table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dispatch_queue (
            id UUID PRIMARY KEY,
            job_id UUID NOT NULL,
            visible_at TIMESTAMPTZ NOT NULL,
            lease_token UUID,
            delivery_count INTEGER NOT NULL DEFAULT 0,
            enqueued_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dispatch_queue_visible ON dispatch_queue(visible_at, enqueued_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_dispatch_queue_lease ON dispatch_queue(lease_token) WHERE lease_token IS NOT NULL",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
