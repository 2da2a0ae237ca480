//! Configuration module
//!
//! Handles CLI configuration including orchestrator URL and client identity.

use gitcast_client::OrchestratorClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,
    /// Sent as `x-client-id` when set
    pub client_id: Option<String>,
}

impl Config {
    pub fn client(&self) -> OrchestratorClient {
        let client = OrchestratorClient::new(&self.orchestrator_url);
        match &self.client_id {
            Some(id) => client.with_client_id(id),
            None => client,
        }
    }
}
