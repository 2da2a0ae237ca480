//! Status Service
//!
//! Read-only job snapshots for polling clients. Reads go straight to the job
//! store and never wait on an executor.

use gitcast_core::dto::job::JobSnapshot;
use uuid::Uuid;

use super::Orchestrator;
use super::job::JobError;

/// Get the current snapshot of a job
pub async fn get_status(orchestrator: &Orchestrator, id: Uuid) -> Result<JobSnapshot, JobError> {
    let job = orchestrator
        .jobs
        .find_by_id(id)
        .await?
        .ok_or(JobError::NotFound(id))?;

    Ok(JobSnapshot::from(job))
}
