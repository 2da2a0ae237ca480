//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::{ClientError, Result};
use gitcast_core::dto::job::{CancelJobResponse, JobSnapshot, SubmitJob, SubmitJobResponse};
use std::time::{Duration, Instant};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// Submit a repository for processing
    ///
    /// # Example
    /// ```no_run
    /// # use gitcast_client::OrchestratorClient;
    /// # use gitcast_core::dto::job::SubmitJob;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let accepted = client.submit_job(&SubmitJob {
    ///     input_identity: "tokio-rs/tokio".to_string(),
    ///     options: Default::default(),
    ///     deadline_seconds: Some(900),
    /// }).await?;
    /// println!("~{}s", accepted.estimated_time_seconds);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit_job(&self, req: &SubmitJob) -> Result<SubmitJobResponse> {
        let request = self.client.post(self.url("/jobs")).json(req);
        let response = self.identified(request).send().await?;

        self.handle_response(response).await
    }

    /// Get the current snapshot of a job
    pub async fn get_job(&self, job_id: Uuid) -> Result<JobSnapshot> {
        let url = self.url(&format!("/jobs/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Request cancellation of a job
    ///
    /// `cancel_requested` is false in the response when the job had already
    /// finished; its final status is reported instead.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<CancelJobResponse> {
        let url = self.url(&format!("/jobs/{}/cancel", job_id));
        let response = self.identified(self.client.post(&url)).send().await?;

        self.handle_response(response).await
    }

    /// Polls a job until it reaches a terminal status
    ///
    /// `on_update` sees every snapshot whose progress, stage or status differs
    /// from the previous one. A `timeout` of `None` waits indefinitely.
    pub async fn wait_for_completion<F>(
        &self,
        job_id: Uuid,
        poll_interval: Duration,
        timeout: Option<Duration>,
        mut on_update: F,
    ) -> Result<JobSnapshot>
    where
        F: FnMut(&JobSnapshot),
    {
        let started = Instant::now();
        let mut last: Option<JobSnapshot> = None;

        loop {
            let snapshot = self.get_job(job_id).await?;

            if last.as_ref().is_none_or(|prev| changed(prev, &snapshot)) {
                on_update(&snapshot);
            }

            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }

            if timeout.is_some_and(|limit| started.elapsed() >= limit) {
                return Err(ClientError::Timeout(job_id));
            }

            tracing::debug!(
                "Job {} is {} ({}%), polling again in {:?}",
                job_id,
                snapshot.status,
                snapshot.progress,
                poll_interval
            );
            last = Some(snapshot);
            tokio::time::sleep(poll_interval).await;
        }
    }

    // =============================================================================
    // Health
    // =============================================================================

    /// Check whether the orchestrator is up
    pub async fn health(&self) -> Result<()> {
        let response = self.client.get(self.url("/health")).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_response(status.as_u16(), None, &body));
        }

        Ok(())
    }
}

fn changed(prev: &JobSnapshot, next: &JobSnapshot) -> bool {
    prev.status != next.status
        || prev.progress != next.progress
        || prev.current_stage != next.current_stage
        || prev.progress_message != next.progress_message
}
