use serde::{Deserialize, Serialize};

use crate::model::ids::TrailId;

/// Snapshot of a remote generation job, as reported by one status check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailGenerationStatus {
    pub progress_percentage: u8,
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub modules_generated: u32,
    #[serde(default)]
    pub total_modules: u32,
    #[serde(default)]
    pub lessons_generated: u32,
    #[serde(default)]
    pub total_lessons: u32,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TrailGenerationStatus {
    /// Status of a job that has been accepted but not started.
    #[must_use]
    pub fn queued() -> Self {
        Self {
            current_step: "queued".to_owned(),
            ..Self::default()
        }
    }

    /// Terminal success. Failures are not terminal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress_percentage >= 100
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Request body for starting (or restarting) generation of a trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTrailRequest {
    pub language_code: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_regenerate: bool,
}

impl GenerateTrailRequest {
    #[must_use]
    pub fn new(language_code: impl Into<String>) -> Self {
        Self {
            language_code: language_code.into(),
            force_regenerate: false,
        }
    }

    #[must_use]
    pub fn regenerate(language_code: impl Into<String>) -> Self {
        Self {
            force_regenerate: true,
            ..Self::new(language_code)
        }
    }
}

/// Response to a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStarted {
    pub trail_id: TrailId,
}
