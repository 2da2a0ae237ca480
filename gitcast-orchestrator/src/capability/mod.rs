//! Stage capabilities
//!
//! Every stage of the pipeline is an external collaborator behind the same
//! contract: it receives the accumulated context of earlier stages plus the
//! job's options and returns a stage result with a progress label, or a
//! [`StageError`]. The executor selects the capability for a stage by table
//! lookup in a [`StageRegistry`].

pub mod http;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use gitcast_core::domain::identity::InputIdentity;
use gitcast_core::domain::job::PipelineContext;
use gitcast_core::domain::options::JobOptions;
use gitcast_core::domain::stage::{Stage, StageError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use http::HttpStage;

/// Everything a capability may read for one invocation
pub struct StageInput<'a> {
    pub job_id: Uuid,
    pub stage: Stage,
    /// Repository the job was submitted for
    pub input_identity: &'a InputIdentity,
    pub context: &'a PipelineContext,
    pub options: &'a JobOptions,
    /// Fires when the job is cancelled. Capabilities that can stop early
    /// should watch it; the executor never aborts a call on user cancellation.
    pub cancel: CancellationToken,
}

/// Successful stage result
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StageOutput {
    pub output: serde_json::Value,
    pub label: String,
}

impl StageOutput {
    pub fn new(output: serde_json::Value, label: impl Into<String>) -> Self {
        Self {
            output,
            label: label.into(),
        }
    }
}

/// Contract implemented by every stage collaborator.
///
/// Implementations need not be idempotent; the executor only re-invokes a
/// capability after a retryable `upstream_unavailable` failure.
#[async_trait]
pub trait StageCapability: Send + Sync {
    async fn run(&self, input: StageInput<'_>) -> Result<StageOutput, StageError>;
}

/// Stage → capability table
#[derive(Clone, Default)]
pub struct StageRegistry {
    capabilities: HashMap<Stage, Arc<dyn StageCapability>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: Stage, capability: Arc<dyn StageCapability>) -> &mut Self {
        self.capabilities.insert(stage, capability);
        self
    }

    pub fn with(mut self, stage: Stage, capability: Arc<dyn StageCapability>) -> Self {
        self.register(stage, capability);
        self
    }

    pub fn get(&self, stage: Stage) -> Result<&Arc<dyn StageCapability>, StageError> {
        self.capabilities
            .get(&stage)
            .ok_or_else(|| StageError::internal(stage, "no capability registered for stage"))
    }
}
