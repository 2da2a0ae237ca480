use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
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
            input_identity TEXT NOT NULL,
            options JSONB NOT NULL DEFAULT '{}',
            status VARCHAR(20) NOT NULL,
            current_stage VARCHAR(20),
            progress SMALLINT NOT NULL DEFAULT 0,
            progress_message TEXT,
            context JSONB NOT NULL DEFAULT '{}',
            result JSONB,
            error JSONB,
            deadline TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, created_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_input_identity ON jobs(input_identity)")
        .execute(pool)
        .await?;

    // Create cache table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            input_identity TEXT PRIMARY KEY,
            cached_result JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            last_accessed_at TIMESTAMPTZ NOT NULL,
            access_count BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cache_entries_created_at ON cache_entries(created_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
