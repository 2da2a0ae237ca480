//! Cache maintenance
//!
//! Freshness is checked per stage when a job reads the cache; this sweep only
//! reclaims entries that no stage could reuse any more.

use chrono::Utc;
use gitcast_core::domain::cache::FreshnessPolicy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use super::rate_limit::RateLimiter;
use crate::repository::{CacheRepository, RepositoryError};

/// Deletes entries older than the longest freshness window
pub async fn sweep_expired(
    cache: &dyn CacheRepository,
    freshness: &FreshnessPolicy,
) -> Result<u64, RepositoryError> {
    let cutoff = Utc::now() - freshness.max_ttl();
    let purged = cache.purge_created_before(cutoff).await?;
    if purged > 0 {
        tracing::info!("Purged {} expired cache entries", purged);
    }
    Ok(purged)
}

/// Periodically sweeps the cache and forgets idle rate-limit clients
pub fn spawn_maintenance(
    cache: Arc<dyn CacheRepository>,
    freshness: FreshnessPolicy,
    rate_limiter: Arc<RateLimiter>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;

            if let Err(e) = sweep_expired(cache.as_ref(), &freshness).await {
                tracing::error!("Cache sweep failed: {}", e);
            }

            let idle = rate_limiter.purge_idle(Instant::now());
            if idle > 0 {
                tracing::debug!("Forgot {} idle rate-limit clients", idle);
            }
        }
    })
}
