//! Orchestrator configuration
//!
//! Defines all configurable parameters for the orchestrator including
//! worker pool sizing, admission limits, stage timeouts, retry policy,
//! cache freshness windows, and collaborator endpoints.

use anyhow::Context;
use gitcast_core::domain::cache::FreshnessPolicy;
use gitcast_core::domain::stage::Stage;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::executor::ExecutionPolicy;

/// Orchestrator configuration
///
/// Every value has a default so the orchestrator starts with no environment
/// at all (in-memory stores, collaborators on localhost).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to
    pub bind_addr: String,

    /// PostgreSQL connection string; `None` selects the in-memory stores
    pub database_url: Option<String>,

    /// Number of jobs executing at once
    pub worker_slots: usize,

    /// Maximum number of admitted jobs waiting for a worker slot
    pub queue_depth: usize,

    /// Submissions allowed per client within `rate_limit_window`
    pub rate_limit_quota: usize,
    pub rate_limit_window: Duration,

    /// Per-stage call timeout
    pub stage_timeouts: HashMap<Stage, Duration>,

    /// Attempts per stage for transient failures, including the first
    pub stage_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    /// Freshness window for fetch, analyze and script outputs
    pub cache_analysis_ttl: Duration,
    /// Freshness window for audio, render and publish outputs
    pub cache_artifact_ttl: Duration,
    pub cache_sweep_interval: Duration,

    /// Rough duration of one job, used for the estimate returned on submission
    pub estimated_job_seconds: u64,

    /// Base URL of the stage collaborators; stage `x` is served at `{url}/stages/x`
    pub stage_service_url: String,
    /// Per-stage endpoint overrides
    pub stage_urls: HashMap<Stage, String>,
}

fn default_stage_timeout(stage: Stage) -> Duration {
    Duration::from_secs(match stage {
        Stage::Fetch => 120,
        Stage::Analyze => 300,
        Stage::Script => 300,
        Stage::Audio => 600,
        Stage::Render => 1800,
        Stage::Publish => 300,
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            worker_slots: 5,
            queue_depth: 50,
            rate_limit_quota: 10,
            rate_limit_window: Duration::from_secs(60),
            stage_timeouts: Stage::ALL
                .iter()
                .map(|stage| (*stage, default_stage_timeout(*stage)))
                .collect(),
            stage_max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            cache_analysis_ttl: Duration::from_secs(24 * 60 * 60),
            cache_artifact_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            cache_sweep_interval: Duration::from_secs(60 * 60),
            estimated_job_seconds: 180,
            stage_service_url: "http://localhost:9090".to_string(),
            stage_urls: HashMap::new(),
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Recognized variables (all optional):
    /// - ORCHESTRATOR_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DATABASE_URL (unset: in-memory stores)
    /// - WORKER_SLOTS (default: 5)
    /// - QUEUE_DEPTH (default: 50)
    /// - RATE_LIMIT_QUOTA (default: 10), RATE_LIMIT_WINDOW (seconds, default: 60)
    /// - STAGE_TIMEOUT_<STAGE> (seconds, e.g. STAGE_TIMEOUT_RENDER)
    /// - STAGE_MAX_ATTEMPTS (default: 3)
    /// - RETRY_BASE_DELAY_MS (default: 500), RETRY_MAX_DELAY_MS (default: 10000)
    /// - CACHE_ANALYSIS_TTL (seconds, default: 86400)
    /// - CACHE_ARTIFACT_TTL (seconds, default: 604800)
    /// - CACHE_SWEEP_INTERVAL (seconds, default: 3600)
    /// - ESTIMATED_JOB_SECONDS (default: 180)
    /// - STAGE_SERVICE_URL (default: http://localhost:9090)
    /// - STAGE_<STAGE>_URL (per-stage override, e.g. STAGE_AUDIO_URL)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut stage_timeouts = defaults.stage_timeouts.clone();
        let mut stage_urls = HashMap::new();
        for stage in Stage::ALL {
            let upper = stage.as_str().to_ascii_uppercase();

            let timeout_var = format!("STAGE_TIMEOUT_{upper}");
            if let Some(secs) = parse_var::<u64>(&timeout_var, var(&timeout_var))? {
                stage_timeouts.insert(stage, Duration::from_secs(secs));
            }

            if let Some(url) = var(&format!("STAGE_{upper}_URL")) {
                stage_urls.insert(stage, url);
            }
        }

        let seconds = |name: &str, default: Duration| -> anyhow::Result<Duration> {
            Ok(parse_var::<u64>(name, var(name))?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };
        let millis = |name: &str, default: Duration| -> anyhow::Result<Duration> {
            Ok(parse_var::<u64>(name, var(name))?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        Ok(Self {
            bind_addr: var("ORCHESTRATOR_BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: var("DATABASE_URL"),
            worker_slots: parse_var("WORKER_SLOTS", var("WORKER_SLOTS"))?
                .unwrap_or(defaults.worker_slots),
            queue_depth: parse_var("QUEUE_DEPTH", var("QUEUE_DEPTH"))?
                .unwrap_or(defaults.queue_depth),
            rate_limit_quota: parse_var("RATE_LIMIT_QUOTA", var("RATE_LIMIT_QUOTA"))?
                .unwrap_or(defaults.rate_limit_quota),
            rate_limit_window: seconds("RATE_LIMIT_WINDOW", defaults.rate_limit_window)?,
            stage_timeouts,
            stage_max_attempts: parse_var("STAGE_MAX_ATTEMPTS", var("STAGE_MAX_ATTEMPTS"))?
                .unwrap_or(defaults.stage_max_attempts),
            retry_base_delay: millis("RETRY_BASE_DELAY_MS", defaults.retry_base_delay)?,
            retry_max_delay: millis("RETRY_MAX_DELAY_MS", defaults.retry_max_delay)?,
            cache_analysis_ttl: seconds("CACHE_ANALYSIS_TTL", defaults.cache_analysis_ttl)?,
            cache_artifact_ttl: seconds("CACHE_ARTIFACT_TTL", defaults.cache_artifact_ttl)?,
            cache_sweep_interval: seconds("CACHE_SWEEP_INTERVAL", defaults.cache_sweep_interval)?,
            estimated_job_seconds: parse_var(
                "ESTIMATED_JOB_SECONDS",
                var("ESTIMATED_JOB_SECONDS"),
            )?
            .unwrap_or(defaults.estimated_job_seconds),
            stage_service_url: var("STAGE_SERVICE_URL").unwrap_or(defaults.stage_service_url),
            stage_urls,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.worker_slots == 0 {
            anyhow::bail!("worker_slots must be greater than 0");
        }

        if self.queue_depth == 0 {
            anyhow::bail!("queue_depth must be greater than 0");
        }

        if self.rate_limit_quota == 0 {
            anyhow::bail!("rate_limit_quota must be greater than 0");
        }

        if self.rate_limit_window.is_zero() {
            anyhow::bail!("rate_limit_window must be greater than 0");
        }

        if self.stage_max_attempts == 0 {
            anyhow::bail!("stage_max_attempts must be greater than 0");
        }

        if self.retry_base_delay > self.retry_max_delay {
            anyhow::bail!("retry_base_delay cannot exceed retry_max_delay");
        }

        if let Some((stage, _)) = self.stage_timeouts.iter().find(|(_, t)| t.is_zero()) {
            anyhow::bail!("timeout for stage {stage} must be greater than 0");
        }

        if self.cache_sweep_interval.is_zero() {
            anyhow::bail!("cache_sweep_interval must be greater than 0");
        }

        for stage in Stage::ALL {
            let url = self.stage_url(stage);
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("endpoint for stage {stage} must start with http:// or https://");
            }
        }

        Ok(())
    }

    /// Endpoint of the collaborator serving `stage`
    pub fn stage_url(&self, stage: Stage) -> String {
        self.stage_urls.get(&stage).cloned().unwrap_or_else(|| {
            format!(
                "{}/stages/{}",
                self.stage_service_url.trim_end_matches('/'),
                stage
            )
        })
    }

    pub fn freshness(&self) -> FreshnessPolicy {
        FreshnessPolicy {
            analysis_ttl: to_chrono(self.cache_analysis_ttl),
            artifact_ttl: to_chrono(self.cache_artifact_ttl),
        }
    }

    /// Timeouts, retry budget and cache windows handed to the executor
    pub fn execution_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            stage_timeouts: self.stage_timeouts.clone(),
            max_attempts: self.stage_max_attempts,
            retry_base_delay: self.retry_base_delay,
            retry_max_delay: self.retry_max_delay,
            freshness: self.freshness(),
            ..ExecutionPolicy::default()
        }
    }
}

fn parse_var<T>(name: &str, value: Option<String>) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {name}: '{raw}'"))
        })
        .transpose()
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
