//! Job DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobResult, JobStatus};
use crate::domain::options::JobOptions;
use crate::domain::stage::{Stage, StageError};

/// Request to submit a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJob {
    pub input_identity: String,
    #[serde(default)]
    pub options: JobOptions,
    /// Optional absolute deadline, relative to submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_seconds: Option<u64>,
}

/// Response to an accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub estimated_time_seconds: u64,
}

/// Read-only view of a job record served to polling clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub input_identity: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobSnapshot {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            input_identity: job.input_identity.to_string(),
            status: job.status,
            progress: job.progress,
            current_stage: job.current_stage,
            progress_message: job.progress_message,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Response to a cancellation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// False when the job had already reached a terminal state
    pub cancel_requested: bool,
}
