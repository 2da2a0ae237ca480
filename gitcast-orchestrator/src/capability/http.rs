//! HTTP stage collaborator
//!
//! Forwards a stage invocation to a remote service and maps its answer onto
//! the stage contract. Timeouts are enforced by the executor, not here.

use async_trait::async_trait;
use gitcast_core::domain::identity::InputIdentity;
use gitcast_core::domain::job::PipelineContext;
use gitcast_core::domain::options::JobOptions;
use gitcast_core::domain::stage::{ErrorCategory, Stage, StageError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{StageCapability, StageInput, StageOutput};

/// Capability that POSTs the stage input to `endpoint`
pub struct HttpStage {
    client: Client,
    endpoint: String,
}

impl HttpStage {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct StageRequest<'a> {
    job_id: Uuid,
    stage: Stage,
    input_identity: &'a InputIdentity,
    options: &'a JobOptions,
    context: &'a PipelineContext,
}

/// Structured error body a collaborator may return
#[derive(Deserialize)]
struct StageErrorBody {
    category: ErrorCategory,
    message: String,
    #[serde(default)]
    retryable: bool,
}

#[async_trait]
impl StageCapability for HttpStage {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError> {
        let stage = input.stage;
        let request = StageRequest {
            job_id: input.job_id,
            stage,
            input_identity: input.input_identity,
            options: input.options,
            context: input.context,
        };

        tracing::debug!("Calling {} collaborator at {}", stage, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| StageError::unavailable(stage, format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StageError::unavailable(stage, format!("reading response failed: {e}")))?;

        if status.is_success() {
            serde_json::from_str::<StageOutput>(&body).map_err(|e| {
                StageError::internal(stage, format!("malformed collaborator response: {e}"))
            })
        } else {
            Err(classify_failure(stage, status, &body))
        }
    }
}

/// Maps a non-success response onto a stage error.
///
/// A structured `{category, message, retryable}` body wins over the status code.
pub fn classify_failure(stage: Stage, status: StatusCode, body: &str) -> StageError {
    if let Ok(structured) = serde_json::from_str::<StageErrorBody>(body) {
        return StageError {
            stage,
            category: structured.category,
            message: structured.message,
            retryable: structured.retryable,
        };
    }

    let message = if body.trim().is_empty() {
        format!("collaborator returned {status}")
    } else {
        format!("collaborator returned {status}: {}", body.trim())
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => StageError::unavailable(stage, message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            StageError::new(stage, ErrorCategory::InputInvalid, message)
        }
        StatusCode::PAYLOAD_TOO_LARGE => {
            StageError::new(stage, ErrorCategory::ResourceLimitExceeded, message)
        }
        s if s.is_client_error() => StageError::rejected(stage, message),
        _ => StageError::internal(stage, message),
    }
}
