//! Per-job pipeline state machine
//!
//! `PipelineState` is the fine-grained state of a job; the coarse
//! [`JobStatus`](super::job::JobStatus) shown to clients is a projection of it.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::job::JobStatus;
use super::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Queued,
    Fetching,
    Analyzing,
    Scripting,
    SynthesizingAudio,
    Rendering,
    Publishing,
    Succeeded,
    Failed,
    Cancelled,
}

/// Rejected state change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl PipelineState {
    /// The state a job is in while `stage` executes
    pub fn running(stage: Stage) -> Self {
        match stage {
            Stage::Fetch => PipelineState::Fetching,
            Stage::Analyze => PipelineState::Analyzing,
            Stage::Script => PipelineState::Scripting,
            Stage::Audio => PipelineState::SynthesizingAudio,
            Stage::Render => PipelineState::Rendering,
            Stage::Publish => PipelineState::Publishing,
        }
    }

    /// The stage executing in this state, for the running states
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Fetching => Some(Stage::Fetch),
            PipelineState::Analyzing => Some(Stage::Analyze),
            PipelineState::Scripting => Some(Stage::Script),
            PipelineState::SynthesizingAudio => Some(Stage::Audio),
            PipelineState::Rendering => Some(Stage::Render),
            PipelineState::Publishing => Some(Stage::Publish),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Succeeded | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    pub fn status(&self) -> JobStatus {
        match self {
            PipelineState::Queued => JobStatus::Queued,
            PipelineState::Succeeded => JobStatus::Succeeded,
            PipelineState::Failed => JobStatus::Failed,
            PipelineState::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Running,
        }
    }

    /// Transition table.
    ///
    /// Stage states only move forward (cache hits may skip several at once).
    /// `Succeeded` follows `Publishing`, or `Fetching` when the cache covered
    /// every stage. `Failed` and `Cancelled` are reachable from any
    /// non-terminal state.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        match (*self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) | (_, Cancelled) => true,
            (Queued, Fetching) => true,
            (Fetching | Publishing, Succeeded) => true,
            (from, to) => match (from.stage(), to.stage()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }

    pub fn transition(self, next: PipelineState) -> Result<PipelineState, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Queued => "queued",
            PipelineState::Fetching => "fetching",
            PipelineState::Analyzing => "analyzing",
            PipelineState::Scripting => "scripting",
            PipelineState::SynthesizingAudio => "synthesizing_audio",
            PipelineState::Rendering => "rendering",
            PipelineState::Publishing => "publishing",
            PipelineState::Succeeded => "succeeded",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
