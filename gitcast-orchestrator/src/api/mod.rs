//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod job;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::service::Orchestrator;

/// GET /health
async fn health_check() -> &'static str {
    "OK"
}

/// Create the main API router with all endpoints
pub fn create_router(orchestrator: Orchestrator) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Job endpoints
        .route("/jobs", post(job::submit_job))
        .route("/jobs/{job_id}", get(job::get_job))
        .route("/jobs/{job_id}/cancel", post(job::cancel_job))
        // Add state and middleware
        .with_state(orchestrator)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{Gate, ScriptedStage, StageSet};
    use crate::service::testing::TestOrchestrator;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use gitcast_core::domain::stage::Stage;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn post_json(uri: &str, client: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-client-id", client)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let stages = StageSet::ok();
        let app = create_router(TestOrchestrator::new(&stages, 1, 10, 10).orchestrator);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_submit_then_poll_until_succeeded() {
        let stages = StageSet::ok();
        let t = TestOrchestrator::new(&stages, 2, 10, 10);
        let app = create_router(t.orchestrator.clone());

        let (status, _, body) = send(
            &app,
            post_json(
                "/jobs",
                "alice",
                json!({
                    "input_identity": "https://github.com/rust-lang/cargo",
                    "options": { "resolution": "720p", "target_length": "short" }
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
        assert!(body["estimated_time_seconds"].as_u64().unwrap() > 0);

        let id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
        t.wait_terminal(id).await;

        let (status, _, body) = send(&app, get(&format!("/jobs/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job_id"], id.to_string());
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["progress"], 100);
        assert_eq!(body["current_stage"], "publish");
        assert!(body["result"]["artifact_url"].as_str().unwrap().ends_with(".mp4"));
        assert!(body.get("error").is_none());
        assert!(body["completed_at"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_submissions_are_bad_requests() {
        let stages = StageSet::ok();
        let app = create_router(TestOrchestrator::new(&stages, 1, 10, 10).orchestrator);

        let cases = [
            json!({ "input_identity": "" }),
            json!({ "input_identity": "acme/app", "options": { "resolution": "4k" } }),
            json!({ "input_identity": "acme/app", "options": { "colour": "blue" } }),
            json!({ "input_identity": "acme/app", "deadline_seconds": 0 }),
            json!({ "repo": "acme/app" }),
        ];
        for case in cases {
            let (status, _, body) = send(&app, post_json("/jobs", "alice", case.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{case}");
            assert_eq!(body["category"], "input_invalid", "{case}");
            assert!(body["error"].is_string());
        }
        assert_eq!(stages.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_retry_after() {
        let stages = StageSet::ok();
        let app = create_router(TestOrchestrator::new(&stages, 2, 10, 2).orchestrator);
        let body = json!({ "input_identity": "acme/app" });

        for _ in 0..2 {
            let (status, _, _) = send(&app, post_json("/jobs", "alice", body.clone())).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }
        let (status, headers, error) = send(&app, post_json("/jobs", "alice", body.clone())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error["category"], "rate_limited");
        let retry_after: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=60).contains(&retry_after));

        let (status, _, _) = send(&app, post_json("/jobs", "bob", body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_full_queue_is_service_unavailable() {
        let gate = Gate::new();
        let stages = StageSet::with(|stage| {
            if stage == Stage::Fetch {
                ScriptedStage::gated(stage, gate.clone())
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let app = create_router(TestOrchestrator::new(&stages, 1, 1, 10).orchestrator);
        let body = json!({ "input_identity": "acme/app" });

        send(&app, post_json("/jobs", "alice", body.clone())).await;
        gate.wait_entered(1).await;
        send(&app, post_json("/jobs", "alice", body.clone())).await;

        let (status, headers, error) = send(&app, post_json("/jobs", "alice", body)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error["category"], "capacity_exceeded");
        assert_eq!(headers[header::RETRY_AFTER], "180");
        gate.release(2);
    }

    #[tokio::test]
    async fn test_unknown_jobs_are_not_found() {
        let stages = StageSet::ok();
        let app = create_router(TestOrchestrator::new(&stages, 1, 10, 10).orchestrator);
        let id = Uuid::new_v4();

        let (status, _, body) = send(&app, get(&format!("/jobs/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["category"], "not_found");

        let (status, _, _) =
            send(&app, post_json(&format!("/jobs/{id}/cancel"), "alice", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(&app, get("/jobs/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let gate = Gate::new();
        let stages = StageSet::with(|stage| {
            if stage == Stage::Analyze {
                ScriptedStage::gated(stage, gate.clone())
            } else {
                ScriptedStage::ok(stage)
            }
        });
        let t = TestOrchestrator::new(&stages, 1, 10, 10);
        let app = create_router(t.orchestrator.clone());

        let (_, _, body) =
            send(&app, post_json("/jobs", "alice", json!({ "input_identity": "acme/app" }))).await;
        let id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
        gate.wait_entered(1).await;

        let cancel = Request::post(format!("/jobs/{id}/cancel"))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, cancel).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancel_requested"], true);
        assert_eq!(body["status"], "running");

        gate.release(1);
        assert_eq!(
            t.wait_terminal(id).await.status,
            gitcast_core::domain::job::JobStatus::Cancelled
        );
        assert_eq!(stages.get(Stage::Script).calls(), 0);
    }
}
