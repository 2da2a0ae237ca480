//! Cache Repository
//!
//! PostgreSQL-backed Cache Store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gitcast_core::domain::cache::CacheEntry;
use sqlx::PgPool;

use super::{CacheRepository, Result};

pub struct PgCacheRepository {
    pool: PgPool,
}

impl PgCacheRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheRepository for PgCacheRepository {
    async fn get(&self, input_identity: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT input_identity, cached_result, created_at, last_accessed_at, access_count
            FROM cache_entries
            WHERE input_identity = $1
            "#,
        )
        .bind(input_identity)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CacheEntry::try_from).transpose()
    }

    async fn record_access(&self, input_identity: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE cache_entries
            SET access_count = access_count + 1, last_accessed_at = $2
            WHERE input_identity = $1
            "#,
        )
        .bind(input_identity)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (input_identity, cached_result, created_at, last_accessed_at, access_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (input_identity) DO UPDATE
            SET cached_result = EXCLUDED.cached_result,
                created_at = EXCLUDED.created_at,
                last_accessed_at = EXCLUDED.last_accessed_at,
                access_count = EXCLUDED.access_count
            "#,
        )
        .bind(&entry.input_identity)
        .bind(serde_json::to_value(&entry.cached_result)?)
        .bind(entry.created_at)
        .bind(entry.last_accessed_at)
        .bind(entry.access_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    input_identity: String,
    cached_result: serde_json::Value,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    access_count: i64,
}

impl TryFrom<CacheRow> for CacheEntry {
    type Error = super::RepositoryError;

    fn try_from(row: CacheRow) -> Result<Self> {
        Ok(CacheEntry {
            input_identity: row.input_identity,
            cached_result: serde_json::from_value(row.cached_result)?,
            created_at: row.created_at,
            last_accessed_at: row.last_accessed_at,
            access_count: row.access_count,
        })
    }
}
