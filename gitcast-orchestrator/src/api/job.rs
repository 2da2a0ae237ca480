//! Job API Handlers
//!
//! HTTP endpoints for job submission, status polling and cancellation.

use axum::{
    Json,
    extract::{
        ConnectInfo, FromRequestParts, Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, request::Parts},
};
use gitcast_core::dto::job::{CancelJobResponse, JobSnapshot, SubmitJob, SubmitJobResponse};
use std::convert::Infallible;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::service::{Orchestrator, job_service, status_service};

/// Header a client may use to identify itself for rate limiting
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Who is submitting: the `x-client-id` header, or the peer address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

impl<S> FromRequestParts<S> for ClientId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(CLIENT_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(id) = header {
            return Ok(ClientId(id.to_string()));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "anonymous".to_string());
        Ok(ClientId(peer))
    }
}

fn job_id(path: Result<Path<Uuid>, PathRejection>) -> ApiResult<Uuid> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// POST /jobs
/// Submit a new job
pub async fn submit_job(
    State(orchestrator): State<Orchestrator>,
    ClientId(client_id): ClientId,
    payload: Result<Json<SubmitJob>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let Json(req) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    tracing::debug!("Submission from {} for {}", client_id, req.input_identity);

    let response = job_service::submit_job(&orchestrator, &client_id, req).await?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /jobs/{job_id}
/// Get the current snapshot of a job
pub async fn get_job(
    State(orchestrator): State<Orchestrator>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<JobSnapshot>> {
    let id = job_id(path)?;
    tracing::debug!("Getting job: {}", id);

    let snapshot = status_service::get_status(&orchestrator, id).await?;

    Ok(Json(snapshot))
}

/// POST /jobs/{job_id}/cancel
/// Request cancellation of a job
pub async fn cancel_job(
    State(orchestrator): State<Orchestrator>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<CancelJobResponse>> {
    let id = job_id(path)?;
    tracing::info!("Cancel requested for job: {}", id);

    let response = job_service::cancel_job(&orchestrator, id).await?;

    Ok(Json(response))
}
