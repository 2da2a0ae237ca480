//! API Error Handling
//!
//! Unified error types and conversion for API responses. Every error body is
//! `{"error": <message>, "category": <category>}`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;

use crate::repository::RepositoryError;
use crate::service::job::{AdmissionError, JobError};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    RateLimited(Duration),
    CapacityExceeded(Duration),
    DatabaseError(RepositoryError),
}

impl ApiError {
    fn category(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "input_invalid",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateLimited(_) => "rate_limited",
            ApiError::CapacityExceeded(_) => "capacity_exceeded",
            ApiError::DatabaseError(_) => "internal",
        }
    }
}

/// Rounds up so clients never retry early
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let category = self.category();
        let (status, message, retry_after) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::RateLimited(retry_after) => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded".to_string(),
                Some(retry_after_secs(retry_after)),
            ),
            ApiError::CapacityExceeded(retry_after) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Job queue is full, try again later".to_string(),
                Some(retry_after_secs(retry_after)),
            ),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let mut response = (
            status,
            Json(serde_json::json!({ "error": message, "category": category })),
        )
            .into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::InputInvalid(msg) => ApiError::BadRequest(msg),
            AdmissionError::RateLimited { retry_after } => ApiError::RateLimited(retry_after),
            AdmissionError::CapacityExceeded { retry_after } => {
                ApiError::CapacityExceeded(retry_after)
            }
            AdmissionError::Storage(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            JobError::Storage(err) => ApiError::DatabaseError(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
