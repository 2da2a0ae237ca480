//! Pipeline stage types
//!
//! The six stages every job moves through, and the structured error a stage
//! capability reports when it fails.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One ordered step of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Analyze,
    Script,
    Audio,
    Render,
    Publish,
}

/// Freshness class of a stage's cached output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClass {
    /// Repository contents, analysis and script
    Analysis,
    /// Narration, rendered video and published artifact
    Artifact,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 6] = [
        Stage::Fetch,
        Stage::Analyze,
        Stage::Script,
        Stage::Audio,
        Stage::Render,
        Stage::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Analyze => "analyze",
            Stage::Script => "script",
            Stage::Audio => "audio",
            Stage::Render => "render",
            Stage::Publish => "publish",
        }
    }

    /// Position of the stage in the pipeline (0-based)
    pub fn index(&self) -> usize {
        match self {
            Stage::Fetch => 0,
            Stage::Analyze => 1,
            Stage::Script => 2,
            Stage::Audio => 3,
            Stage::Render => 4,
            Stage::Publish => 5,
        }
    }

    /// The stage that runs after this one, if any
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }

    /// Progress percentage reached once this stage has succeeded.
    ///
    /// Weights reflect relative expected cost, not measured time.
    pub fn checkpoint(&self) -> u8 {
        match self {
            Stage::Fetch => 10,
            Stage::Analyze => 25,
            Stage::Script => 45,
            Stage::Audio => 65,
            Stage::Render => 90,
            Stage::Publish => 100,
        }
    }

    pub fn cache_class(&self) -> CacheClass {
        match self {
            Stage::Fetch | Stage::Analyze | Stage::Script => CacheClass::Analysis,
            Stage::Audio | Stage::Render | Stage::Publish => CacheClass::Artifact,
        }
    }

    /// Stages from this one (inclusive) to the end of the pipeline
    pub fn remaining(&self) -> &'static [Stage] {
        &Stage::ALL[self.index()..]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Stage::Fetch),
            "analyze" => Ok(Stage::Analyze),
            "script" => Ok(Stage::Script),
            "audio" => Ok(Stage::Audio),
            "render" => Ok(Stage::Render),
            "publish" => Ok(Stage::Publish),
            _ => Err(format!("Invalid stage: {s}")),
        }
    }
}

/// Failure category reported by a stage capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InputInvalid,
    ResourceLimitExceeded,
    UpstreamUnavailable,
    UpstreamRejected,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InputInvalid => "input_invalid",
            ErrorCategory::ResourceLimitExceeded => "resource_limit_exceeded",
            ErrorCategory::UpstreamUnavailable => "upstream_unavailable",
            ErrorCategory::UpstreamRejected => "upstream_rejected",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure of a single stage invocation
///
/// Persisted verbatim into the job record when it ends the job, so polling
/// clients can tell "retry later" from "fix your input".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{stage} stage failed ({category}): {message}")]
pub struct StageError {
    pub stage: Stage,
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
}

impl StageError {
    pub fn new(stage: Stage, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            stage,
            category,
            message: message.into(),
            retryable: false,
        }
    }

    /// Transient upstream failure the executor may retry
    pub fn unavailable(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(stage, ErrorCategory::UpstreamUnavailable, message)
        }
    }

    pub fn rejected(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorCategory::UpstreamRejected, message)
    }

    pub fn internal(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorCategory::Internal, message)
    }

    /// A stage call that exceeded its time budget
    pub fn timeout(stage: Stage, after: std::time::Duration) -> Self {
        Self::unavailable(stage, format!("timed out after {}s", after.as_secs_f64()))
    }

    /// Whether the executor's retry policy applies to this failure
    pub fn is_transient(&self) -> bool {
        self.category == ErrorCategory::UpstreamUnavailable && self.retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoints_are_increasing() {
        let checkpoints: Vec<u8> = Stage::ALL.iter().map(|s| s.checkpoint()).collect();
        assert!(checkpoints.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Stage::Publish.checkpoint(), 100);
    }

    #[test]
    fn test_next_and_remaining() {
        assert_eq!(Stage::Fetch.next(), Some(Stage::Analyze));
        assert_eq!(Stage::Publish.next(), None);
        assert_eq!(
            Stage::Render.remaining(),
            &[Stage::Render, Stage::Publish][..]
        );
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::Audio).unwrap();
        assert_eq!(json, "\"audio\"");
        assert_eq!("render".parse::<Stage>().unwrap(), Stage::Render);
        assert!("encode".parse::<Stage>().is_err());
    }

    #[test]
    fn test_only_retryable_unavailable_is_transient() {
        assert!(StageError::unavailable(Stage::Fetch, "503").is_transient());
        assert!(StageError::timeout(Stage::Render, std::time::Duration::from_secs(5)).is_transient());

        let mut not_retryable = StageError::unavailable(Stage::Fetch, "down");
        not_retryable.retryable = false;
        assert!(!not_retryable.is_transient());

        let mut rejected = StageError::rejected(Stage::Fetch, "private repo");
        rejected.retryable = true;
        assert!(!rejected.is_transient());
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::rejected(Stage::Fetch, "repository is private");
        assert_eq!(
            err.to_string(),
            "fetch stage failed (upstream_rejected): repository is private"
        );
    }
}
