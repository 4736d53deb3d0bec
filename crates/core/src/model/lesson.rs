use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::LessonId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LessonError {
    #[error("score must be between 0 and 100, got {0}")]
    ScoreOutOfRange(u8),

    #[error("lesson {0} has no generated content yet")]
    Placeholder(LessonId),
}

//
// ─── LESSON TYPE ───────────────────────────────────────────────────────────────
//

/// Kind of generated content a lesson carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LessonType {
    Vocabulary,
    Grammar,
    Reading,
    Listening,
    Speaking,
    Writing,
    Conversation,
    Culture,
    Review,
    #[serde(other)]
    Other,
}

//
// ─── PROGRESS PATCH ────────────────────────────────────────────────────────────
//

/// Body of a lesson progress report.
///
/// `completed == false` never clears an existing completion; it only allows
/// `score` and `time_spent_seconds` to be adjusted without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgressPatch {
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_spent_seconds: Option<u32>,
}

impl LessonProgressPatch {
    /// Marks the lesson complete with optional score and time spent.
    #[must_use]
    pub fn completed(score: Option<u8>, time_spent_seconds: Option<u32>) -> Self {
        Self {
            completed: true,
            score,
            time_spent_seconds,
        }
    }

    /// Checks the patch values are within range.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::ScoreOutOfRange` for scores above 100.
    pub fn validate(&self) -> Result<(), LessonError> {
        match self.score {
            Some(score) if score > 100 => Err(LessonError::ScoreOutOfRange(score)),
            _ => Ok(()),
        }
    }
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// An atomic learning unit with generated content and completion facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    id: LessonId,
    title: String,
    #[serde(rename = "type")]
    kind: LessonType,
    #[serde(default)]
    duration_minutes: u32,
    #[serde(default)]
    content: serde_json::Value,
    #[serde(default)]
    is_placeholder: bool,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    score: Option<u8>,
    #[serde(default)]
    time_spent_seconds: Option<u32>,
}

impl Lesson {
    /// Creates a lesson with generated (empty) content and no completion.
    #[must_use]
    pub fn new(
        id: LessonId,
        title: impl Into<String>,
        kind: LessonType,
        duration_minutes: u32,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            kind,
            duration_minutes,
            content: serde_json::Value::Null,
            is_placeholder: false,
            completed_at: None,
            score: None,
            time_spent_seconds: None,
        }
    }

    /// Creates a reserved slot whose content has not been generated yet.
    #[must_use]
    pub fn placeholder(
        id: LessonId,
        title: impl Into<String>,
        kind: LessonType,
        duration_minutes: u32,
    ) -> Self {
        Self {
            is_placeholder: true,
            ..Self::new(id, title, kind, duration_minutes)
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self.is_placeholder = false;
        self
    }

    /// Rehydrate completion facts reported by the remote service.
    #[must_use]
    pub fn with_completion(
        mut self,
        completed_at: DateTime<Utc>,
        score: Option<u8>,
        time_spent_seconds: Option<u32>,
    ) -> Self {
        self.completed_at = Some(completed_at);
        self.score = score;
        self.time_spent_seconds = time_spent_seconds;
        self
    }

    #[must_use]
    pub fn id(&self) -> &LessonId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn kind(&self) -> LessonType {
        self.kind
    }

    #[must_use]
    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    #[must_use]
    pub fn content(&self) -> &serde_json::Value {
        &self.content
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.is_placeholder
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    #[must_use]
    pub fn score(&self) -> Option<u8> {
        self.score
    }

    #[must_use]
    pub fn time_spent_seconds(&self) -> Option<u32> {
        self.time_spent_seconds
    }

    /// Apply a progress report at `now`.
    ///
    /// Completion is monotonic: a patch with `completed == false` leaves an
    /// existing `completed_at` untouched. Score and time spent may move in
    /// either direction (retakes).
    ///
    /// # Errors
    ///
    /// Returns `LessonError` if the patch is out of range or the lesson is
    /// still a placeholder and the patch tries to complete it.
    pub fn apply_progress(
        &mut self,
        patch: &LessonProgressPatch,
        now: DateTime<Utc>,
    ) -> Result<(), LessonError> {
        patch.validate()?;
        if patch.completed && self.is_placeholder {
            return Err(LessonError::Placeholder(self.id.clone()));
        }

        if patch.completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if let Some(score) = patch.score {
            self.score = Some(score);
        }
        if let Some(seconds) = patch.time_spent_seconds {
            self.time_spent_seconds = Some(seconds);
        }
        Ok(())
    }

    /// Replace this lesson with an authoritative copy, keeping a known
    /// completion if the incoming copy lost it.
    pub fn reconcile(&mut self, authoritative: Lesson) {
        let completed_at = authoritative.completed_at.or(self.completed_at);
        *self = authoritative;
        self.completed_at = completed_at;
    }
}
