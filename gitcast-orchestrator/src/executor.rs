//! Pipeline executor
//!
//! Runs one job's stage sequence to a terminal state:
//! - consults the cache and skips the reusable prefix of stages
//! - invokes each remaining capability in order, with a per-stage timeout
//! - retries transient failures with exponential backoff
//! - persists the job record after every transition
//! - honours cancellation at safe checkpoints and the optional job deadline
//!
//! The executor is the single writer of the job it runs.

use chrono::Utc;
use gitcast_core::domain::cache::{CacheEntry, CachedStage, FreshnessPolicy};
use gitcast_core::domain::job::{Job, JobResult, JobStatus, PipelineContext};
use gitcast_core::domain::stage::{Stage, StageError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{StageInput, StageOutput, StageRegistry};
use crate::repository::{CacheRepository, JobRepository, RepositoryError};

/// Timeouts, retry budget and cache windows applied to every job
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub stage_timeouts: HashMap<Stage, Duration>,
    pub default_stage_timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub freshness: FreshnessPolicy,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            stage_timeouts: HashMap::new(),
            default_stage_timeout: Duration::from_secs(300),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            freshness: FreshnessPolicy::default(),
        }
    }
}

impl ExecutionPolicy {
    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        self.stage_timeouts
            .get(&stage)
            .copied()
            .unwrap_or(self.default_stage_timeout)
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

/// Why a job stopped before succeeding without a stage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

impl Interrupt {
    fn reason(&self) -> &'static str {
        match self {
            Interrupt::Cancelled => "Cancelled by request",
            Interrupt::DeadlineExceeded => "Deadline exceeded",
        }
    }
}

enum StageOutcome {
    Completed(StageOutput),
    Failed(StageError),
    Interrupted(Interrupt),
}

/// Reusable cached prefix found for a job
struct CachePlan {
    reused: Vec<CachedStage>,
    /// Access count of the entry the prefix came from, carried into its rewrite
    access_count: i64,
}

impl CachePlan {
    fn miss() -> Self {
        Self {
            reused: Vec::new(),
            access_count: 0,
        }
    }

    fn is_full_hit(&self) -> bool {
        self.reused.len() == Stage::ALL.len()
    }

    fn resume_at(&self) -> Option<Stage> {
        match self.reused.last() {
            None => Some(Stage::Fetch),
            Some(last) => last.stage.next(),
        }
    }
}

pub struct PipelineExecutor {
    stages: StageRegistry,
    jobs: Arc<dyn JobRepository>,
    cache: Arc<dyn CacheRepository>,
    policy: ExecutionPolicy,
}

impl PipelineExecutor {
    pub fn new(
        stages: StageRegistry,
        jobs: Arc<dyn JobRepository>,
        cache: Arc<dyn CacheRepository>,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            stages,
            jobs,
            cache,
            policy,
        }
    }

    /// Fails a job whose run ended without reaching a terminal state.
    ///
    /// Returns false when the record was already terminal.
    pub async fn abandon(&self, job_id: Uuid, reason: &str) -> Result<bool, RepositoryError> {
        let mut job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or(RepositoryError::NotFound(job_id))?;
        if job.is_terminal() {
            return Ok(false);
        }

        let stage = job.current_stage.unwrap_or(Stage::Fetch);
        self.transition(&mut job, |job| {
            job.fail(StageError::internal(stage, format!("interrupted: {reason}")))
        })?;
        self.jobs.save(&job).await?;
        Ok(true)
    }

    /// Drives a queued job to a terminal state and returns that state.
    ///
    /// Only storage failures are returned as errors; stage failures end up in
    /// the job record.
    pub async fn run(
        &self,
        job_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<JobStatus, RepositoryError> {
        let mut job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or(RepositoryError::NotFound(job_id))?;

        if job.status != JobStatus::Queued {
            warn!(
                "Job {} dispatched in state {}, skipping execution",
                job_id, job.status
            );
            return Ok(job.status);
        }

        if let Some(interrupt) = self.interrupted(&job, &cancel) {
            return self.finish_interrupted(&mut job, interrupt).await;
        }

        self.transition(&mut job, |job| job.enter_stage(Stage::Fetch))?;
        job.progress_message = Some("Checking cache".to_string());
        self.jobs.save(&job).await?;
        info!("Job {} started for {}", job.id, job.input_identity);

        let plan = self.plan_from_cache(&job).await;
        let cached_stages: Vec<Stage> = plan.reused.iter().map(|c| c.stage).collect();
        if let Some(last) = plan.reused.last() {
            for cached in &plan.reused {
                job.context.insert(cached.stage, cached.output.clone());
            }
            job.advance_progress(last.stage.checkpoint());
            job.progress_message = Some(format!("Reused cached {} output", last.stage));
            info!(
                "Job {} reusing {} cached stage(s) for {}",
                job.id,
                cached_stages.len(),
                job.input_identity
            );
        }

        if let Some(resume_at) = plan.resume_at() {
            for &stage in resume_at.remaining() {
                if let Some(interrupt) = self.interrupted(&job, &cancel) {
                    return self.finish_interrupted(&mut job, interrupt).await;
                }

                if job.current_stage != Some(stage) {
                    self.transition(&mut job, |job| job.enter_stage(stage))?;
                }
                job.progress_message = Some(format!("Running {stage}"));
                self.jobs.save(&job).await?;

                match self.invoke_with_retry(&job, stage, &cancel).await {
                    StageOutcome::Completed(out) => {
                        debug!("Job {} finished {}: {}", job.id, stage, out.label);
                        job.complete_stage(stage, out.output, out.label);
                        self.jobs.save(&job).await?;
                    }
                    StageOutcome::Failed(err) => {
                        warn!("Job {} failed: {}", job.id, err);
                        self.transition(&mut job, |job| job.fail(err))?;
                        self.jobs.save(&job).await?;
                        return Ok(job.status);
                    }
                    StageOutcome::Interrupted(interrupt) => {
                        return self.finish_interrupted(&mut job, interrupt).await;
                    }
                }
            }
        }

        let result = match build_result(&job.context, cached_stages) {
            Ok(result) => result,
            Err(err) => {
                warn!("Job {} failed: {}", job.id, err);
                self.transition(&mut job, |job| job.fail(err))?;
                self.jobs.save(&job).await?;
                return Ok(job.status);
            }
        };

        self.store_in_cache(&job, &plan).await;

        self.transition(&mut job, |job| job.succeed(result))?;
        job.progress_message = Some("Published".to_string());
        self.jobs.save(&job).await?;
        info!("Job {} succeeded", job.id);

        Ok(job.status)
    }

    fn interrupted(&self, job: &Job, cancel: &CancellationToken) -> Option<Interrupt> {
        if job.deadline_passed(Utc::now()) {
            Some(Interrupt::DeadlineExceeded)
        } else if cancel.is_cancelled() {
            Some(Interrupt::Cancelled)
        } else {
            None
        }
    }

    async fn finish_interrupted(
        &self,
        job: &mut Job,
        interrupt: Interrupt,
    ) -> Result<JobStatus, RepositoryError> {
        self.transition(job, |job| job.cancel(interrupt.reason()))?;
        self.jobs.save(job).await?;
        info!("Job {} cancelled: {}", job.id, interrupt.reason());
        Ok(job.status)
    }

    /// Applies a state change; an invalid transition means the executor
    /// itself is broken, so it is surfaced rather than persisted.
    fn transition<F>(&self, job: &mut Job, change: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut Job) -> Result<(), gitcast_core::domain::state::TransitionError>,
    {
        change(job).map_err(|e| {
            error!("Job {}: {}", job.id, e);
            RepositoryError::Corrupt(e.to_string())
        })
    }

    /// Looks up the reusable prefix; cache trouble only costs a cache miss
    async fn plan_from_cache(&self, job: &Job) -> CachePlan {
        let identity = job.input_identity.as_str();
        let entry = match self.cache.get(identity).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", identity, e);
                None
            }
        };

        let Some(entry) = entry else {
            debug!("Cache miss for {}", identity);
            return CachePlan::miss();
        };

        let now = Utc::now();
        let reused: Vec<CachedStage> = entry
            .reusable_prefix(&job.options, &self.policy.freshness, now)
            .into_iter()
            .cloned()
            .collect();

        let mut access_count = entry.access_count;
        if !reused.is_empty() {
            access_count += 1;
            if let Err(e) = self.cache.record_access(identity, now).await {
                warn!("Recording cache access for {} failed: {}", identity, e);
            }
        }

        CachePlan {
            reused,
            access_count,
        }
    }

    /// Memoizes all six stage outputs; reused stages keep their production time
    async fn store_in_cache(&self, job: &Job, plan: &CachePlan) {
        if plan.is_full_hit() {
            return;
        }

        let now = Utc::now();
        let stages = Stage::ALL
            .iter()
            .filter_map(|stage| {
                let output = job.context.get(*stage)?.clone();
                let produced_at = plan
                    .reused
                    .iter()
                    .find(|c| c.stage == *stage)
                    .map(|c| c.produced_at)
                    .unwrap_or(now);
                Some(CachedStage {
                    stage: *stage,
                    fingerprint: job.options.fingerprint(*stage),
                    output,
                    produced_at,
                })
            })
            .collect();

        let mut entry = CacheEntry::new(job.input_identity.as_str(), stages);
        entry.access_count = plan.access_count;
        entry.last_accessed_at = now;
        if let Err(e) = self.cache.put(&entry).await {
            warn!(
                "Caching results for {} failed: {}",
                job.input_identity, e
            );
        }
    }

    /// Invokes one stage, retrying transient failures within the budget
    async fn invoke_with_retry(
        &self,
        job: &Job,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        let capability = match self.stages.get(stage) {
            Ok(capability) => capability,
            Err(err) => return StageOutcome::Failed(err),
        };
        let timeout = self.policy.stage_timeout(stage);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let input = StageInput {
                job_id: job.id,
                stage,
                input_identity: &job.input_identity,
                context: &job.context,
                options: &job.options,
                cancel: cancel.child_token(),
            };

            let result = tokio::select! {
                biased;
                _ = deadline_elapsed(job) => {
                    return StageOutcome::Interrupted(Interrupt::DeadlineExceeded);
                }
                result = tokio::time::timeout(timeout, capability.run(input)) => result,
            };

            let err = match result {
                Ok(Ok(output)) => return StageOutcome::Completed(output),
                Ok(Err(mut err)) => {
                    err.stage = stage;
                    err
                }
                Err(_) => StageError::timeout(stage, timeout),
            };

            if cancel.is_cancelled() {
                return StageOutcome::Interrupted(Interrupt::Cancelled);
            }

            if !err.is_transient() || attempt >= max_attempts {
                return StageOutcome::Failed(err);
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                "Job {} {} attempt {}/{} failed: {}; retrying in {:?}",
                job.id, stage, attempt, max_attempts, err.message, delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StageOutcome::Interrupted(Interrupt::Cancelled),
                _ = deadline_elapsed(job) => {
                    return StageOutcome::Interrupted(Interrupt::DeadlineExceeded);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Resolves when the job's deadline passes; never resolves without one
async fn deadline_elapsed(job: &Job) {
    match job.deadline {
        Some(deadline) => {
            let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(remaining).await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Derives the job result from the publish output
fn build_result(
    context: &PipelineContext,
    cached_stages: Vec<Stage>,
) -> Result<JobResult, StageError> {
    let publish = context
        .get(Stage::Publish)
        .ok_or_else(|| StageError::internal(Stage::Publish, "publish produced no output"))?;

    let artifact_url = publish
        .get("artifact_url")
        .and_then(|v| v.as_str())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            StageError::internal(Stage::Publish, "publish output has no artifact_url")
        })?
        .to_string();

    let metadata = publish
        .get("metadata")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    Ok(JobResult {
        artifact_url,
        metadata,
        cached_stages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StageOutput;
    use crate::capability::testing::{Gate, ScriptedStage, StageSet};
    use crate::repository::{InMemoryCacheRepository, InMemoryJobRepository};
    use gitcast_core::domain::identity::InputIdentity;
    use gitcast_core::domain::options::{JobOptions, TargetLength};
    use gitcast_core::domain::stage::ErrorCategory;

    struct Harness {
        executor: Arc<PipelineExecutor>,
        jobs: Arc<InMemoryJobRepository>,
        cache: Arc<InMemoryCacheRepository>,
    }

    fn fast_policy() -> ExecutionPolicy {
        ExecutionPolicy {
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(4),
            ..ExecutionPolicy::default()
        }
    }

    fn harness(stages: &StageSet, policy: ExecutionPolicy) -> Harness {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let cache = Arc::new(InMemoryCacheRepository::new());
        let executor = Arc::new(PipelineExecutor::new(
            stages.registry(),
            jobs.clone(),
            cache.clone(),
            policy,
        ));
        Harness {
            executor,
            jobs,
            cache,
        }
    }

    async fn queued(h: &Harness, repo: &str, options: JobOptions) -> Uuid {
        let job = Job::new(InputIdentity::parse(repo).unwrap(), options, None);
        h.jobs.create(&job).await.unwrap();
        job.id
    }

    async fn stored(h: &Harness, id: Uuid) -> Job {
        h.jobs.find_by_id(id).await.unwrap().unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ExecutionPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_happy_path_runs_every_stage_once() {
        let stages = StageSet::ok();
        let h = harness(&stages, fast_policy());
        let id = queued(&h, "rust-lang/cargo", JobOptions::default()).await;

        let status = h.executor.run(id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Succeeded);
        for stage in Stage::ALL {
            assert_eq!(stages.get(stage).calls(), 1, "{stage}");
        }

        let job = stored(&h, id).await;
        assert_eq!(job.progress, 100);
        assert_eq!(job.current_stage, Some(Stage::Publish));
        assert!(job.error.is_none());
        assert!(job.completed_at.is_some());
        let result = job.result.unwrap();
        assert_eq!(result.artifact_url, format!("https://cdn.example.test/{id}.mp4"));
        assert_eq!(result.metadata["duration_seconds"], 95);
        assert!(result.cached_stages.is_empty());

        let entry = h.cache.get("github.com/rust-lang/cargo").await.unwrap().unwrap();
        assert_eq!(entry.cached_result.len(), 6);
    }

    #[tokio::test]
    async fn test_second_job_with_same_options_is_served_from_cache() {
        let stages = StageSet::ok();
        let h = harness(&stages, fast_policy());

        let first = queued(&h, "https://github.com/rust-lang/cargo", JobOptions::default()).await;
        h.executor.run(first, CancellationToken::new()).await.unwrap();
        assert_eq!(stages.total_calls(), 6);

        let second = queued(&h, "git@github.com:rust-lang/cargo.git", JobOptions::default()).await;
        let status = h.executor.run(second, CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Succeeded);
        assert_eq!(stages.total_calls(), 6);

        let job = stored(&h, second).await;
        let result = job.result.unwrap();
        assert_eq!(result.cached_stages, Stage::ALL.to_vec());
        assert_eq!(result.artifact_url, format!("https://cdn.example.test/{first}.mp4"));

        let entry = h.cache.get("github.com/rust-lang/cargo").await.unwrap().unwrap();
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.newest_stage_at(), entry.stage(Stage::Fetch).map(|c| c.produced_at));
    }

    #[tokio::test]
    async fn test_longer_output_regenerates_from_script() {
        let stages = StageSet::ok();
        let h = harness(&stages, fast_policy());

        let first = queued(&h, "tokio-rs/tokio", JobOptions::default()).await;
        h.executor.run(first, CancellationToken::new()).await.unwrap();

        let longer = JobOptions {
            target_length: TargetLength::Long,
            ..JobOptions::default()
        };
        let second = queued(&h, "tokio-rs/tokio", longer).await;
        h.executor.run(second, CancellationToken::new()).await.unwrap();

        assert_eq!(stages.get(Stage::Fetch).calls(), 1);
        assert_eq!(stages.get(Stage::Analyze).calls(), 1);
        for stage in [Stage::Script, Stage::Audio, Stage::Render, Stage::Publish] {
            assert_eq!(stages.get(stage).calls(), 2, "{stage}");
        }

        let job = stored(&h, second).await;
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(
            job.result.unwrap().cached_stages,
            vec![Stage::Fetch, Stage::Analyze]
        );
    }

    #[tokio::test]
    async fn test_stale_cache_is_regenerated() {
        let stages = StageSet::ok();
        let policy = ExecutionPolicy {
            freshness: FreshnessPolicy {
                analysis_ttl: chrono::Duration::zero(),
                artifact_ttl: chrono::Duration::zero(),
            },
            ..fast_policy()
        };
        let h = harness(&stages, policy);

        let first = queued(&h, "serde-rs/serde", JobOptions::default()).await;
        h.executor.run(first, CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queued(&h, "serde-rs/serde", JobOptions::default()).await;
        h.executor.run(second, CancellationToken::new()).await.unwrap();

        assert_eq!(stages.total_calls(), 12);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_until_success() {
        let stages = StageSet::with(|stage| {
            if stage == Stage::Audio {
                ScriptedStage::scripted(
                    stage,
                    vec![
                        Err(StageError::unavailable(stage, "tts overloaded")),
                        Err(StageError::unavailable(stage, "tts overloaded")),
                    ],
                )
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let h = harness(&stages, fast_policy());
        let id = queued(&h, "rust-lang/rust", JobOptions::default()).await;

        let status = h.executor.run(id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Succeeded);
        assert_eq!(stages.get(Stage::Audio).calls(), 3);
        assert!(stored(&h, id).await.error.is_none());
    }

    #[tokio::test]
    async fn test_retries_exhaust_into_failure() {
        let stages = StageSet::with(|stage| {
            if stage == Stage::Render {
                ScriptedStage::scripted(
                    stage,
                    (0..5)
                        .map(|_| Err(StageError::unavailable(stage, "encoder busy")))
                        .collect(),
                )
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let h = harness(&stages, fast_policy());
        let id = queued(&h, "rust-lang/rust", JobOptions::default()).await;

        let status = h.executor.run(id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(stages.get(Stage::Render).calls(), 3);
        assert_eq!(stages.get(Stage::Publish).calls(), 0);

        let job = stored(&h, id).await;
        let error = job.error.unwrap();
        assert_eq!(error.stage, Stage::Render);
        assert_eq!(error.category, ErrorCategory::UpstreamUnavailable);
        assert!(job.result.is_none());
        assert_eq!(job.progress, Stage::Audio.checkpoint());
        assert!(h.cache.get("github.com/rust-lang/rust").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_retryable_failure_stops_immediately() {
        let stages = StageSet::with(|stage| {
            if stage == Stage::Fetch {
                ScriptedStage::scripted(
                    stage,
                    vec![Err(StageError::rejected(stage, "repository is private"))],
                )
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let h = harness(&stages, fast_policy());
        let id = queued(&h, "acme/secret", JobOptions::default()).await;

        let status = h.executor.run(id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(stages.get(Stage::Fetch).calls(), 1);
        assert_eq!(stages.total_calls(), 1);

        let job = stored(&h, id).await;
        assert_eq!(job.error.unwrap().stage, Stage::Fetch);
        assert_eq!(job.current_stage, Some(Stage::Fetch));
    }

    #[tokio::test]
    async fn test_unavailable_but_not_retryable_is_not_retried() {
        let stages = StageSet::with(|stage| {
            if stage == Stage::Script {
                let mut err = StageError::unavailable(stage, "model retired");
                err.retryable = false;
                ScriptedStage::scripted(stage, vec![Err(err)])
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let h = harness(&stages, fast_policy());
        let id = queued(&h, "acme/app", JobOptions::default()).await;

        assert_eq!(
            h.executor.run(id, CancellationToken::new()).await.unwrap(),
            JobStatus::Failed
        );
        assert_eq!(stages.get(Stage::Script).calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout_counts_as_transient() {
        let gate = Gate::new();
        let stages = StageSet::with(|stage| {
            if stage == Stage::Analyze {
                ScriptedStage::gated(stage, gate.clone())
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let mut policy = fast_policy();
        policy.stage_timeouts.insert(Stage::Analyze, Duration::from_secs(2));
        let h = harness(&stages, policy);
        let id = queued(&h, "acme/app", JobOptions::default()).await;

        let status = h.executor.run(id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(stages.get(Stage::Analyze).calls(), 3);

        let error = stored(&h, id).await.error.unwrap();
        assert_eq!(error.category, ErrorCategory::UpstreamUnavailable);
        assert!(error.retryable);
        assert!(error.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_during_analyze_never_reaches_script() {
        let gate = Gate::new();
        let stages = StageSet::with(|stage| {
            if stage == Stage::Analyze {
                ScriptedStage::gated(stage, gate.clone())
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let h = harness(&stages, fast_policy());
        let id = queued(&h, "acme/app", JobOptions::default()).await;

        let cancel = CancellationToken::new();
        let run = {
            let executor = h.executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { executor.run(id, cancel).await })
        };

        gate.wait_entered(1).await;
        assert_eq!(stored(&h, id).await.current_stage, Some(Stage::Analyze));
        cancel.cancel();
        gate.release(1);

        let status = run.await.unwrap().unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        for stage in [Stage::Script, Stage::Audio, Stage::Render, Stage::Publish] {
            assert_eq!(stages.get(stage).calls(), 0, "{stage}");
        }

        let job = stored(&h, id).await;
        assert!(job.result.is_none());
        assert!(job.context.get(Stage::Fetch).is_some());
        assert!(job.context.get(Stage::Analyze).is_some(), "in-flight output kept");
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch_runs_nothing() {
        let stages = StageSet::ok();
        let h = harness(&stages, fast_policy());
        let id = queued(&h, "acme/app", JobOptions::default()).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = h.executor.run(id, cancel).await.unwrap();

        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(stages.total_calls(), 0);
        assert_eq!(stored(&h, id).await.current_stage, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_in_flight_stage() {
        let gate = Gate::new();
        let stages = StageSet::with(|stage| {
            if stage == Stage::Render {
                ScriptedStage::gated(stage, gate.clone())
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let mut policy = fast_policy();
        policy.default_stage_timeout = Duration::from_secs(3600);
        let h = harness(&stages, policy);

        let job = Job::new(
            InputIdentity::parse("acme/app").unwrap(),
            JobOptions::default(),
            Some(Utc::now() + chrono::Duration::seconds(30)),
        );
        h.jobs.create(&job).await.unwrap();

        let status = h.executor.run(job.id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(stages.get(Stage::Publish).calls(), 0);

        let record = stored(&h, job.id).await;
        assert_eq!(record.progress_message.as_deref(), Some("Deadline exceeded"));
        assert_eq!(record.current_stage, Some(Stage::Render));
    }

    #[tokio::test]
    async fn test_publish_without_artifact_fails_job() {
        let stages = StageSet::with(|stage| {
            if stage == Stage::Publish {
                ScriptedStage::scripted(
                    stage,
                    vec![Ok(StageOutput::new(serde_json::json!({}), "published"))],
                )
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let h = harness(&stages, fast_policy());
        let id = queued(&h, "acme/app", JobOptions::default()).await;

        assert_eq!(
            h.executor.run(id, CancellationToken::new()).await.unwrap(),
            JobStatus::Failed
        );
        let error = stored(&h, id).await.error.unwrap();
        assert_eq!(error.stage, Stage::Publish);
        assert_eq!(error.category, ErrorCategory::Internal);
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_rerun() {
        let stages = StageSet::ok();
        let h = harness(&stages, fast_policy());
        let id = queued(&h, "acme/app", JobOptions::default()).await;
        h.executor.run(id, CancellationToken::new()).await.unwrap();

        let status = h.executor.run(id, CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Succeeded);
        assert_eq!(stages.total_calls(), 6);
    }

    #[tokio::test]
    async fn test_missing_capability_fails_with_internal_error() {
        let stages = StageSet::ok();
        let jobs = Arc::new(InMemoryJobRepository::new());
        let cache = Arc::new(InMemoryCacheRepository::new());
        let mut registry = StageRegistry::new();
        registry.register(Stage::Fetch, stages.get(Stage::Fetch).clone());
        let executor = PipelineExecutor::new(registry, jobs.clone(), cache, fast_policy());

        let job = Job::new(InputIdentity::parse("acme/app").unwrap(), JobOptions::default(), None);
        jobs.create(&job).await.unwrap();

        assert_eq!(
            executor.run(job.id, CancellationToken::new()).await.unwrap(),
            JobStatus::Failed
        );
        let stored = jobs.find_by_id(job.id).await.unwrap().unwrap();
        let error = stored.error.unwrap();
        assert_eq!(error.stage, Stage::Analyze);
        assert_eq!(error.category, ErrorCategory::Internal);
    }
}
