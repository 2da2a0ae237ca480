//! Gitcast HTTP Client
//!
//! A simple, type-safe HTTP client for the Gitcast orchestrator API, used by
//! the CLI and by anything else that submits repositories for video rendering.
//!
//! # Example
//!
//! ```no_run
//! use gitcast_client::OrchestratorClient;
//! use gitcast_core::dto::job::SubmitJob;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let accepted = client.submit_job(&SubmitJob {
//!         input_identity: "https://github.com/rust-lang/cargo".to_string(),
//!         options: Default::default(),
//!         deadline_seconds: None,
//!     }).await?;
//!
//!     println!("Submitted job: {}", accepted.job_id);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;

// Re-exported so callers need only this crate
pub use error::{ClientError, Result};

use reqwest::{Client, RequestBuilder, header};
use serde::de::DeserializeOwned;

/// Header the orchestrator uses to attribute submissions for rate limiting
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// HTTP client for the Gitcast orchestrator API
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Orchestrator root, stored without a trailing slash
    base_url: String,
    /// Shared connection pool
    client: Client,
    /// Identity sent in the `x-client-id` header, if any
    client_id: Option<String>,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use gitcast_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Builds a client on top of a preconfigured `reqwest::Client`
    ///
    /// Use it to set request timeouts or a proxy.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            client_id: None,
        }
    }

    /// Identify submissions with `client_id` instead of the connection address
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Orchestrator root URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn identified(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.client_id {
            Some(id) => request.header(CLIENT_ID_HEADER, id),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Decodes a success body or maps the failure onto `ClientError`
    ///
    /// A `Retry-After` header is kept on rate-limited responses.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let error_text = response.text().await.unwrap_or_default();
            return Err(ClientError::from_response(
                status.as_u16(),
                retry_after,
                &error_text,
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
