//! Job Service
//!
//! Admission and cancellation of jobs.

use chrono::Utc;
use gitcast_core::domain::identity::InputIdentity;
use gitcast_core::domain::job::Job;
use gitcast_core::dto::job::{CancelJobResponse, SubmitJob, SubmitJobResponse};
use std::time::Duration;
use uuid::Uuid;

use super::Orchestrator;
use crate::repository::RepositoryError;

/// Synchronous rejection of a submission
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("{0}")]
    InputInvalid(String),
    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },
    #[error("job queue is full, retry in {}s", retry_after.as_secs().max(1))]
    CapacityExceeded { retry_after: Duration },
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

/// Lookup failure for an existing job
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

/// Validates, rate-limits and enqueues a new job
pub async fn submit_job(
    orchestrator: &Orchestrator,
    client_id: &str,
    req: SubmitJob,
) -> Result<SubmitJobResponse, AdmissionError> {
    let identity = InputIdentity::parse(&req.input_identity)
        .map_err(|e| AdmissionError::InputInvalid(e.to_string()))?;
    req.options
        .validate()
        .map_err(AdmissionError::InputInvalid)?;
    let deadline = match req.deadline_seconds {
        None => None,
        Some(0) => {
            return Err(AdmissionError::InputInvalid(
                "deadline_seconds must be positive".to_string(),
            ));
        }
        Some(seconds) => Some(
            i64::try_from(seconds)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|after| Utc::now().checked_add_signed(after))
                .ok_or_else(|| {
                    AdmissionError::InputInvalid("deadline_seconds is too large".to_string())
                })?,
        ),
    };

    orchestrator
        .rate_limiter
        .check(client_id)
        .map_err(|retry_after| {
            tracing::debug!("Client {} is rate limited", client_id);
            AdmissionError::RateLimited { retry_after }
        })?;

    let slot = orchestrator
        .scheduler
        .try_reserve()
        .map_err(|_| AdmissionError::CapacityExceeded {
            retry_after: slot_turnover(
                orchestrator.estimated_job_seconds,
                orchestrator.scheduler.worker_slots(),
            ),
        })?;
    let waiting_ahead = orchestrator.scheduler.waiting().saturating_sub(1);

    let job = Job::new(identity, req.options, deadline);
    orchestrator.jobs.create(&job).await?;
    slot.enqueue(job.id);

    tracing::info!(
        "Job {} admitted for {} (client {}, {} waiting ahead)",
        job.id,
        job.input_identity,
        client_id,
        waiting_ahead
    );

    Ok(SubmitJobResponse {
        job_id: job.id,
        status: job.status,
        estimated_time_seconds: estimate_seconds(
            orchestrator.estimated_job_seconds,
            waiting_ahead,
            orchestrator.scheduler.worker_slots(),
        ),
    })
}

/// One job's duration, plus one more for every full round of workers ahead
fn estimate_seconds(per_job: u64, waiting_ahead: usize, worker_slots: usize) -> u64 {
    let slots = worker_slots.max(1) as u64;
    per_job.saturating_mul(slots + waiting_ahead as u64) / slots
}

/// Typical wait until some worker slot frees up
fn slot_turnover(per_job: u64, worker_slots: usize) -> Duration {
    Duration::from_secs((per_job / worker_slots.max(1) as u64).max(1))
}

/// Records cancellation intent; the executor performs the transition
pub async fn cancel_job(orchestrator: &Orchestrator, id: Uuid) -> Result<CancelJobResponse, JobError> {
    let job = orchestrator
        .jobs
        .find_by_id(id)
        .await?
        .ok_or(JobError::NotFound(id))?;

    if job.is_terminal() {
        tracing::debug!("Cancel of job {} ignored: already {}", id, job.status);
        return Ok(CancelJobResponse {
            job_id: id,
            status: job.status,
            cancel_requested: false,
        });
    }

    let signalled = orchestrator.scheduler.cancel(id);
    if signalled {
        tracing::info!("Cancellation requested for job {}", id);
    } else {
        tracing::warn!("Job {} is {} but no worker holds it", id, job.status);
    }

    Ok(CancelJobResponse {
        job_id: id,
        status: job.status,
        cancel_requested: signalled,
    })
}
