//! Job options
//!
//! Options are captured at submission and never change afterwards. Each option
//! first affects one stage; every later stage inherits that dependency through
//! its input, which is what [`JobOptions::fingerprint`] encodes.

use serde::{Deserialize, Serialize};

use super::stage::Stage;

/// How deep the repository analysis goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Overview,
    #[default]
    Standard,
    Deep,
}

/// Requested length of the generated video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetLength {
    Short,
    #[default]
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "720p")]
    Hd720,
    #[default]
    #[serde(rename = "1080p")]
    Hd1080,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Overview => "overview",
            DetailLevel::Standard => "standard",
            DetailLevel::Deep => "deep",
        }
    }
}

impl TargetLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetLength::Short => "short",
            TargetLength::Medium => "medium",
            TargetLength::Long => "long",
        }
    }
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hd720 => "720p",
            Resolution::Hd1080 => "1080p",
        }
    }
}

fn default_voice() -> String {
    "default".to_string()
}

/// Immutable per-job configuration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobOptions {
    #[serde(default)]
    pub detail_level: DetailLevel,
    #[serde(default)]
    pub target_length: TargetLength,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub resolution: Resolution,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            detail_level: DetailLevel::default(),
            target_length: TargetLength::default(),
            voice: default_voice(),
            resolution: Resolution::default(),
        }
    }
}

impl JobOptions {
    /// Validates free-form option values
    pub fn validate(&self) -> Result<(), String> {
        let voice = self.voice.trim();
        if voice.is_empty() {
            return Err("voice cannot be empty".to_string());
        }
        if voice.len() > 64 {
            return Err("voice is too long (max 64 characters)".to_string());
        }
        if !voice
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err("voice may only contain letters, digits, '-' and '_'".to_string());
        }
        Ok(())
    }

    /// Canonical rendering of every option the output of `stage` depends on.
    ///
    /// Two jobs may share a cached stage output only when their fingerprints
    /// for that stage are equal. Fetch depends on no option.
    pub fn fingerprint(&self, stage: Stage) -> String {
        let mut parts = Vec::new();
        if stage >= Stage::Analyze {
            parts.push(format!("detail_level={}", self.detail_level.as_str()));
        }
        if stage >= Stage::Script {
            parts.push(format!("target_length={}", self.target_length.as_str()));
        }
        if stage >= Stage::Audio {
            parts.push(format!("voice={}", self.voice.trim()));
        }
        if stage >= Stage::Render {
            parts.push(format!("resolution={}", self.resolution.as_str()));
        }
        parts.join(";")
    }
}
