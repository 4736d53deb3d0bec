use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{LessonId, ModuleId, TrailId};
use crate::model::lesson::Lesson;
use crate::model::module::{ModuleStatus, TrailModule};
use crate::progress::{TrailProgress, compute_progress};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrailError {
    #[error("trail cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: TrailStatus, to: TrailStatus },
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle of a trail.
///
/// Moves forward only (`Generating → Partial → Ready → Archived`). A `Ready`
/// trail may go back to `Generating`/`Partial` through an explicit restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrailStatus {
    Generating,
    Partial,
    Ready,
    Archived,
}

impl TrailStatus {
    fn rank(self) -> u8 {
        match self {
            TrailStatus::Generating => 0,
            TrailStatus::Partial => 1,
            TrailStatus::Ready => 2,
            TrailStatus::Archived => 3,
        }
    }

    /// Whether `next` is reachable without a regeneration request.
    #[must_use]
    pub fn can_advance_to(self, next: TrailStatus) -> bool {
        next.rank() >= self.rank()
    }

    /// Whether a regeneration request may move this trail to `next`.
    #[must_use]
    pub fn can_restart_to(self, next: TrailStatus) -> bool {
        self == TrailStatus::Ready
            && matches!(next, TrailStatus::Generating | TrailStatus::Partial)
    }

    /// Active trails count against the per-learner quota.
    #[must_use]
    pub fn is_active(self) -> bool {
        self != TrailStatus::Archived
    }

    #[must_use]
    pub fn is_generating(self) -> bool {
        matches!(self, TrailStatus::Generating | TrailStatus::Partial)
    }
}

//
// ─── LANGUAGE / LEVEL ──────────────────────────────────────────────────────────
//

/// Language and level a trail was generated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailLanguage {
    pub language_code: String,
    pub language_name: String,
    #[serde(default)]
    pub language_flag: String,
    pub level_code: String,
    pub level_name: String,
}

//
// ─── TRAIL ─────────────────────────────────────────────────────────────────────
//

/// The full curriculum for one (learner, language) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trail {
    id: TrailId,
    #[serde(flatten)]
    language: TrailLanguage,
    status: TrailStatus,
    #[serde(default)]
    modules: Vec<TrailModule>,
    #[serde(default)]
    progress: TrailProgress,
    #[serde(default)]
    estimated_duration_minutes: Option<u32>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl Trail {
    /// Creates a trail that has just been queued for generation.
    #[must_use]
    pub fn new(id: TrailId, language: TrailLanguage, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            language,
            status: TrailStatus::Generating,
            modules: Vec::new(),
            progress: TrailProgress::default(),
            estimated_duration_minutes: None,
            created_at: Some(created_at),
        }
    }

    /// Replace the module list, sorting by `order_index` and deriving progress.
    #[must_use]
    pub fn with_modules(mut self, modules: Vec<TrailModule>) -> Self {
        self.modules = modules;
        self.normalize();
        self
    }

    #[must_use]
    pub fn with_estimated_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration_minutes = Some(minutes);
        self
    }

    #[must_use]
    pub fn id(&self) -> &TrailId {
        &self.id
    }

    #[must_use]
    pub fn language(&self) -> &TrailLanguage {
        &self.language
    }

    #[must_use]
    pub fn status(&self) -> TrailStatus {
        self.status
    }

    #[must_use]
    pub fn modules(&self) -> &[TrailModule] {
        &self.modules
    }

    #[must_use]
    pub fn module(&self, id: &ModuleId) -> Option<&TrailModule> {
        self.modules.iter().find(|module| module.id() == id)
    }

    #[must_use]
    pub fn progress(&self) -> &TrailProgress {
        &self.progress
    }

    #[must_use]
    pub fn estimated_duration_minutes(&self) -> Option<u32> {
        self.estimated_duration_minutes
    }

    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    #[must_use]
    pub fn total_lessons(&self) -> usize {
        self.modules.iter().map(|module| module.lessons().len()).sum()
    }

    /// Locate a lesson and the module that owns it.
    #[must_use]
    pub fn find_lesson(&self, id: &LessonId) -> Option<(&TrailModule, &Lesson)> {
        self.modules
            .iter()
            .find_map(|module| module.lesson(id).map(|lesson| (module, lesson)))
    }

    /// Mutable access to a lesson, with the owning module's status.
    pub fn lesson_mut(&mut self, id: &LessonId) -> Option<(ModuleStatus, &mut Lesson)> {
        self.modules.iter_mut().find_map(|module| {
            let status = module.status();
            module.lesson_mut(id).map(|lesson| (status, lesson))
        })
    }

    /// Move to `next` along the forward lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::InvalidTransition` for backwards moves.
    pub fn advance_to(&mut self, next: TrailStatus) -> Result<(), TrailError> {
        if !self.status.can_advance_to(next) {
            return Err(TrailError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Restart generation of a `Ready` trail in place.
    ///
    /// # Errors
    ///
    /// Returns `TrailError::InvalidTransition` unless the trail is `Ready`.
    pub fn restart_generation(&mut self) -> Result<(), TrailError> {
        if !self.status.can_restart_to(TrailStatus::Generating) {
            return Err(TrailError::InvalidTransition {
                from: self.status,
                to: TrailStatus::Generating,
            });
        }
        self.status = TrailStatus::Generating;
        Ok(())
    }

    /// Insert or reconcile one module, keeping `order_index` order.
    pub fn upsert_module(&mut self, incoming: TrailModule) {
        match self.modules.iter_mut().find(|m| m.id() == incoming.id()) {
            Some(existing) => existing.reconcile(incoming),
            None => self.modules.push(incoming),
        }
        self.normalize();
    }

    /// Fold an authoritative copy of this trail into the local one.
    ///
    /// Completion facts already known locally survive. The status only moves
    /// backwards when `allow_restart` is set, i.e. a regeneration was requested.
    pub fn reconcile(&mut self, incoming: Trail, allow_restart: bool) {
        let status = if self.status.can_advance_to(incoming.status)
            || (allow_restart && self.status.can_restart_to(incoming.status))
        {
            incoming.status
        } else {
            self.status
        };

        let mut previous = std::mem::take(&mut self.modules);
        for module in incoming.modules {
            match previous.iter().position(|m| m.id() == module.id()) {
                Some(index) => {
                    let mut known = previous.swap_remove(index);
                    known.reconcile(module);
                    self.modules.push(known);
                }
                None => self.modules.push(module),
            }
        }

        self.language = incoming.language;
        self.estimated_duration_minutes = incoming.estimated_duration_minutes;
        self.created_at = incoming.created_at.or(self.created_at);
        self.status = status;
        self.normalize();
    }

    /// Sort modules, enforce module invariants and rederive progress.
    pub fn normalize(&mut self) {
        self.modules.sort_by_key(TrailModule::order_index);
        for module in &mut self.modules {
            module.normalize_status();
        }
        self.recompute_progress();
    }

    pub fn recompute_progress(&mut self) {
        self.progress = compute_progress(&self.modules);
    }

    #[must_use]
    pub fn summary(&self) -> TrailSummary {
        TrailSummary::from_trail(self)
    }
}

//
// ─── SUMMARY ───────────────────────────────────────────────────────────────────
//

/// List-view projection of a trail without nested modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailSummary {
    pub id: TrailId,
    #[serde(flatten)]
    pub language: TrailLanguage,
    pub status: TrailStatus,
    #[serde(default)]
    pub lessons_completed: u32,
    #[serde(default)]
    pub total_lessons: u32,
    #[serde(default)]
    pub progress_percentage: u8,
    #[serde(default)]
    pub average_score: Option<f64>,
    #[serde(default)]
    pub time_spent_minutes: u32,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl TrailSummary {
    #[must_use]
    pub fn from_trail(trail: &Trail) -> Self {
        let mut summary = Self {
            id: trail.id.clone(),
            language: trail.language.clone(),
            status: trail.status,
            lessons_completed: 0,
            total_lessons: 0,
            progress_percentage: 0,
            average_score: None,
            time_spent_minutes: 0,
            last_activity_at: None,
            created_at: trail.created_at,
        };
        summary.apply_progress(&trail.progress);
        summary
    }

    /// Copy derived counters onto the summary.
    pub fn apply_progress(&mut self, progress: &TrailProgress) {
        self.lessons_completed = progress.lessons_completed;
        self.total_lessons = progress.total_lessons;
        self.progress_percentage = progress.progress_percentage;
        self.average_score = progress.average_score;
        self.time_spent_minutes = progress.time_spent_minutes;
        self.last_activity_at = progress.last_activity_at;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
