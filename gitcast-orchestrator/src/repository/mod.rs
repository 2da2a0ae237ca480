//! Repository Module
//!
//! Data access layer for the orchestrator: the Job Record Store and the Cache
//! Store. Both are trait-based so the executor and scheduler can run against
//! PostgreSQL in production and in-memory maps in tests or database-less
//! deployments.

pub mod cache;
pub mod job;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gitcast_core::domain::cache::CacheEntry;
use gitcast_core::domain::job::{Job, JobStatus};
use uuid::Uuid;

pub use cache::PgCacheRepository;
pub use job::PgJobRepository;
pub use memory::{InMemoryCacheRepository, InMemoryJobRepository};

/// Storage error type
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job {0} already exists")]
    Duplicate(Uuid),
    #[error("job {0} is in a terminal state and cannot be modified")]
    TerminalRecord(Uuid),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Durable table of job state
///
/// Single-record reads and writes are atomic; no cross-record transactions.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Inserts a newly admitted job
    async fn create(&self, job: &Job) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>>;

    /// Replaces the stored record.
    ///
    /// Fails with [`RepositoryError::TerminalRecord`] when the stored record
    /// is already terminal, so a terminal state can never be overwritten.
    async fn save(&self, job: &Job) -> Result<()>;

    /// Jobs with the given status, oldest first
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;
}

/// Memoized stage outputs keyed by input identity
#[async_trait]
pub trait CacheRepository: Send + Sync {
    async fn get(&self, input_identity: &str) -> Result<Option<CacheEntry>>;

    /// Bumps `access_count` and `last_accessed_at`
    async fn record_access(&self, input_identity: &str, at: DateTime<Utc>) -> Result<()>;

    /// Inserts or overwrites the entry; last writer wins
    async fn put(&self, entry: &CacheEntry) -> Result<()>;

    /// Deletes entries created before `cutoff`, returning how many were removed
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
