//! Cache domain types
//!
//! A cache entry memoizes stage outputs per input identity. Each stage output
//! carries the options fingerprint it was produced under and its production
//! time, so reuse is decided stage by stage.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::options::JobOptions;
use super::stage::{CacheClass, Stage};

/// Freshness windows per cache class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub analysis_ttl: Duration,
    pub artifact_ttl: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            analysis_ttl: Duration::hours(24),
            artifact_ttl: Duration::days(7),
        }
    }
}

impl FreshnessPolicy {
    pub fn ttl(&self, stage: Stage) -> Duration {
        match stage.cache_class() {
            CacheClass::Analysis => self.analysis_ttl,
            CacheClass::Artifact => self.artifact_ttl,
        }
    }

    /// The longest window; entries older than this are useless for every stage
    pub fn max_ttl(&self) -> Duration {
        self.analysis_ttl.max(self.artifact_ttl)
    }
}

/// One memoized stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedStage {
    pub stage: Stage,
    pub fingerprint: String,
    pub output: serde_json::Value,
    pub produced_at: DateTime<Utc>,
}

impl CachedStage {
    pub fn is_fresh(&self, policy: &FreshnessPolicy, now: DateTime<Utc>) -> bool {
        now - self.produced_at <= policy.ttl(self.stage)
    }
}

/// Memoized result for an input identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub input_identity: String,
    pub cached_result: Vec<CachedStage>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
}

impl CacheEntry {
    pub fn new(input_identity: impl Into<String>, stages: Vec<CachedStage>) -> Self {
        let now = Utc::now();
        Self {
            input_identity: input_identity.into(),
            cached_result: stages,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&CachedStage> {
        self.cached_result.iter().find(|c| c.stage == stage)
    }

    /// Longest run of stages, starting at fetch, that a job with `options`
    /// may reuse at `now`.
    ///
    /// The run stops at the first stage that is missing, stale, or was
    /// produced under different options.
    pub fn reusable_prefix(
        &self,
        options: &JobOptions,
        policy: &FreshnessPolicy,
        now: DateTime<Utc>,
    ) -> Vec<&CachedStage> {
        Stage::ALL
            .iter()
            .map_while(|stage| {
                self.stage(*stage).filter(|cached| {
                    cached.is_fresh(policy, now) && cached.fingerprint == options.fingerprint(*stage)
                })
            })
            .collect()
    }

    /// Production time of the newest stage in the entry
    pub fn newest_stage_at(&self) -> Option<DateTime<Utc>> {
        self.cached_result.iter().map(|c| c.produced_at).max()
    }
}
