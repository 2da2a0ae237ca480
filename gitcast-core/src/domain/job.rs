//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::identity::InputIdentity;
use super::options::JobOptions;
use super::stage::{Stage, StageError};
use super::state::{PipelineState, TransitionError};

/// Job record
///
/// Created on admission; afterwards only the executor owning the job mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub input_identity: InputIdentity,
    pub options: JobOptions,
    pub status: JobStatus,
    pub current_stage: Option<Stage>,
    pub progress: u8,
    pub progress_message: Option<String>,
    pub context: PipelineContext,
    pub result: Option<JobResult>,
    pub error: Option<StageError>,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Coarse job status shown to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// Produced artifact of a succeeded job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub artifact_url: String,
    pub metadata: serde_json::Value,
    /// Stages whose output came from the cache instead of a capability call
    pub cached_stages: Vec<Stage>,
}

/// Accumulated outputs of the stages a job has completed so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineContext(BTreeMap<Stage, serde_json::Value>);

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: Stage, output: serde_json::Value) {
        self.0.insert(stage, output);
    }

    pub fn get(&self, stage: Stage) -> Option<&serde_json::Value> {
        self.0.get(&stage)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Job {
    /// Creates a freshly admitted job in the `Queued` state
    pub fn new(
        input_identity: InputIdentity,
        options: JobOptions,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_identity,
            options,
            status: JobStatus::Queued,
            current_stage: None,
            progress: 0,
            progress_message: None,
            context: PipelineContext::new(),
            result: None,
            error: None,
            deadline,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Fine-grained state derived from status and current stage
    pub fn state(&self) -> PipelineState {
        match self.status {
            JobStatus::Queued => PipelineState::Queued,
            JobStatus::Running => self
                .current_stage
                .map(PipelineState::running)
                .unwrap_or(PipelineState::Fetching),
            JobStatus::Succeeded => PipelineState::Succeeded,
            JobStatus::Failed => PipelineState::Failed,
            JobStatus::Cancelled => PipelineState::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the job into the state that runs `stage`
    pub fn enter_stage(&mut self, stage: Stage) -> Result<(), TransitionError> {
        self.state().transition(PipelineState::running(stage))?;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = JobStatus::Running;
        self.current_stage = Some(stage);
        Ok(())
    }

    /// Records a stage output and raises progress to the stage checkpoint
    pub fn complete_stage(&mut self, stage: Stage, output: serde_json::Value, label: String) {
        self.context.insert(stage, output);
        self.advance_progress(stage.checkpoint());
        self.progress_message = Some(label);
    }

    /// Progress never moves backwards
    pub fn advance_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn succeed(&mut self, result: JobResult) -> Result<(), TransitionError> {
        self.state().transition(PipelineState::Succeeded)?;
        self.status = JobStatus::Succeeded;
        self.advance_progress(100);
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: StageError) -> Result<(), TransitionError> {
        self.state().transition(PipelineState::Failed)?;
        self.status = JobStatus::Failed;
        self.current_stage = Some(error.stage);
        self.progress_message = Some(error.message.clone());
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Partial context is kept; it is never promoted to `result`
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.state().transition(PipelineState::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.progress_message = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}
