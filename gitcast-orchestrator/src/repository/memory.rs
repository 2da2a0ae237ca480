//! In-memory repositories
//!
//! Used when no `DATABASE_URL` is configured and throughout the tests. Locks
//! are held only for the duration of a single map operation, never across an
//! await point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gitcast_core::domain::cache::CacheEntry;
use gitcast_core::domain::job::{Job, JobStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{CacheRepository, JobRepository, RepositoryError, Result};

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(RepositoryError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn save(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write();
        let stored = jobs.get_mut(&job.id).ok_or(RepositoryError::NotFound(job.id))?;
        if stored.is_terminal() {
            return Err(RepositoryError::TerminalRecord(job.id));
        }
        *stored = job.clone();
        Ok(())
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}

#[derive(Default)]
pub struct InMemoryCacheRepository {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheRepository for InMemoryCacheRepository {
    async fn get(&self, input_identity: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.read().get(input_identity).cloned())
    }

    async fn record_access(&self, input_identity: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.entries.write().get_mut(input_identity) {
            entry.access_count += 1;
            entry.last_accessed_at = at;
        }
        Ok(())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.entries
            .write()
            .insert(entry.input_identity.clone(), entry.clone());
        Ok(())
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcast_core::domain::identity::InputIdentity;
    use gitcast_core::domain::options::JobOptions;
    use gitcast_core::domain::stage::Stage;

    fn job() -> Job {
        Job::new(
            InputIdentity::parse("tokio-rs/tokio").unwrap(),
            JobOptions::default(),
            None,
        )
    }

    #[tokio::test]
    async fn test_terminal_record_cannot_be_overwritten() {
        let repo = InMemoryJobRepository::new();
        let mut job = job();
        repo.create(&job).await.unwrap();

        job.enter_stage(Stage::Fetch).unwrap();
        job.cancel("stop").unwrap();
        repo.save(&job).await.unwrap();

        let mut stale = job.clone();
        stale.status = JobStatus::Running;
        assert!(matches!(
            repo.save(&stale).await,
            Err(RepositoryError::TerminalRecord(_))
        ));

        let stored = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing_records() {
        let repo = InMemoryJobRepository::new();
        let job = job();
        repo.create(&job).await.unwrap();
        assert!(matches!(
            repo.create(&job).await,
            Err(RepositoryError::Duplicate(_))
        ));

        let other = self::job();
        assert!(matches!(
            repo.save(&other).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_status_is_oldest_first() {
        let repo = InMemoryJobRepository::new();
        let mut first = job();
        first.created_at -= chrono::Duration::seconds(10);
        let second = job();
        repo.create(&second).await.unwrap();
        repo.create(&first).await.unwrap();

        let queued = repo.find_by_status(JobStatus::Queued).await.unwrap();
        let ids: Vec<Uuid> = queued.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_cache_access_and_purge() {
        let repo = InMemoryCacheRepository::new();
        let mut old = CacheEntry::new("github.com/a/old", vec![]);
        old.created_at -= chrono::Duration::days(30);
        repo.put(&old).await.unwrap();
        repo.put(&CacheEntry::new("github.com/a/new", vec![]))
            .await
            .unwrap();

        let now = Utc::now();
        repo.record_access("github.com/a/new", now).await.unwrap();
        repo.record_access("github.com/a/missing", now).await.unwrap();
        let entry = repo.get("github.com/a/new").await.unwrap().unwrap();
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.last_accessed_at, now);

        let purged = repo
            .purge_created_before(now - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(repo.get("github.com/a/old").await.unwrap().is_none());
    }
}
