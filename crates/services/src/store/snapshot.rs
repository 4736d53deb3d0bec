use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use trail_core::model::{
    LanguageEnrollment, Lesson, LessonId, LessonProgressPatch, ModuleStatus, Trail,
    TrailGenerationStatus, TrailId, TrailModule, TrailStatus, TrailSummary,
};
use trail_core::progress::{ProgressTally, TrailProgress};
use tracing::debug;

use crate::error::{TrailApiError, TrailStoreError};

/// Immutable view of everything the store knows. Every change publishes a
/// fresh `Arc<TrailSnapshot>`, so consumers can compare pointers.
#[derive(Debug, Clone, Default)]
pub struct TrailSnapshot {
    active_trails: Vec<TrailSummary>,
    trails: BTreeMap<TrailId, Trail>,
    generation: BTreeMap<TrailId, TrailGenerationStatus>,
    // Language of each tracked generation, for trails not listed yet.
    generation_languages: BTreeMap<TrailId, String>,
    latest_generation: Option<TrailId>,
    error: Option<String>,
    is_loading: bool,
}

/// Pre-update copies needed to undo an optimistic lesson update.
#[derive(Debug)]
pub(crate) struct LessonRollback {
    trail: Trail,
    summary: Option<TrailSummary>,
}

/// Pre-archive copies needed to undo an optimistic archive.
#[derive(Debug, Default)]
pub(crate) struct ArchiveRollback {
    summary: Option<(usize, TrailSummary)>,
    trail: Option<Trail>,
    pub(crate) generation: Option<TrailGenerationStatus>,
    language: Option<String>,
}

impl TrailSnapshot {
    /// Non-archived trails, in the order the service listed them.
    #[must_use]
    pub fn active_trails(&self) -> &[TrailSummary] {
        &self.active_trails
    }

    #[must_use]
    pub fn summary(&self, id: &TrailId) -> Option<&TrailSummary> {
        self.active_trails.iter().find(|summary| &summary.id == id)
    }

    /// Fully loaded trails, keyed by id.
    #[must_use]
    pub fn trails(&self) -> &BTreeMap<TrailId, Trail> {
        &self.trails
    }

    #[must_use]
    pub fn trail(&self, id: &TrailId) -> Option<&Trail> {
        self.trails.get(id)
    }

    #[must_use]
    pub fn lesson(&self, id: &LessonId) -> Option<&Lesson> {
        self.trails
            .values()
            .find_map(|trail| trail.find_lesson(id).map(|(_, lesson)| lesson))
    }

    /// The most recently received generation status, if any job is tracked.
    #[must_use]
    pub fn generation_status(&self) -> Option<&TrailGenerationStatus> {
        self.latest_generation
            .as_ref()
            .and_then(|id| self.generation.get(id))
    }

    #[must_use]
    pub fn generation_status_for(&self, id: &TrailId) -> Option<&TrailGenerationStatus> {
        self.generation.get(id)
    }

    /// Trails with a generation job currently being tracked.
    pub fn generating(&self) -> impl Iterator<Item = &TrailId> {
        self.generation.keys()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Active trails plus tracked generations not listed yet.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let listed = self
            .active_trails
            .iter()
            .filter(|summary| summary.is_active())
            .count();
        let pending = self
            .generation
            .keys()
            .filter(|id| self.summary(id).is_none())
            .count();
        listed + pending
    }

    #[must_use]
    pub fn active_trail_for_language(&self, language_code: &str) -> Option<&TrailSummary> {
        self.active_trails
            .iter()
            .find(|summary| summary.is_active() && summary.language.language_code == language_code)
    }

    /// Id of the active or generating trail for a language, listed or not.
    #[must_use]
    pub fn trail_for_language(&self, language_code: &str) -> Option<&TrailId> {
        self.active_trail_for_language(language_code)
            .map(|summary| &summary.id)
            .or_else(|| {
                self.generation_languages
                    .iter()
                    .find(|(id, code)| {
                        code.as_str() == language_code && self.generation.contains_key(*id)
                    })
                    .map(|(id, _)| id)
            })
    }

    /// Progress of a loaded trail.
    #[must_use]
    pub fn progress_for(&self, id: &TrailId) -> Option<&TrailProgress> {
        self.trails.get(id).map(Trail::progress)
    }

    /// Progress across every loaded, non-archived trail.
    #[must_use]
    pub fn overall_progress(&self) -> TrailProgress {
        let mut tally = ProgressTally::new();
        for trail in self.trails.values().filter(|t| t.status().is_active()) {
            tally.add_modules(trail.modules());
        }
        tally.finish()
    }

    /// Enrollments a new trail could be generated for.
    ///
    /// Empty once the active-trail limit is reached.
    #[must_use]
    pub fn eligible_languages<'a>(
        &self,
        enrollments: &'a [LanguageEnrollment],
        max_active_trails: usize,
    ) -> Vec<&'a LanguageEnrollment> {
        if self.active_count() >= max_active_trails {
            return Vec::new();
        }
        enrollments
            .iter()
            .filter(|enrollment| {
                self.trail_for_language(&enrollment.language_code)
                    .is_none()
            })
            .collect()
    }

    // ─── Mutations (store only) ─────────────────────────────────────────────

    pub(crate) fn set_error(&mut self, error: impl ToString) {
        self.error = Some(error.to_string());
    }

    pub(crate) fn clear_error(&mut self) {
        self.error = None;
    }

    pub(crate) fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }

    pub(crate) fn replace_active_trails(&mut self, summaries: Vec<TrailSummary>) {
        self.active_trails = summaries
            .into_iter()
            .filter(TrailSummary::is_active)
            .map(|mut summary| {
                if let Some(trail) = self.trails.get(&summary.id) {
                    summary.apply_progress(trail.progress());
                }
                summary
            })
            .collect();
    }

    fn upsert_summary(&mut self, summary: TrailSummary) {
        match self.active_trails.iter_mut().find(|s| s.id == summary.id) {
            Some(existing) => *existing = summary,
            None => self.active_trails.push(summary),
        }
    }

    fn sync_summary(&mut self, id: &TrailId) {
        let Some(trail) = self.trails.get(id) else {
            return;
        };
        if trail.status().is_active() {
            let summary = trail.summary();
            self.upsert_summary(summary);
        } else {
            self.active_trails.retain(|summary| &summary.id != id);
        }
    }

    /// Fold an authoritative trail into the loaded set and the summary list.
    pub(crate) fn merge_trail(&mut self, incoming: Trail, allow_restart: bool) {
        let id = incoming.id().clone();
        let merged = match self.trails.remove(&id) {
            Some(mut local) => {
                local.reconcile(incoming, allow_restart);
                local
            }
            None => {
                let mut trail = incoming;
                trail.normalize();
                trail
            }
        };
        self.trails.insert(id.clone(), merged);
        self.sync_summary(&id);
    }

    /// Insert or reconcile one module of a loaded trail. Returns false if the
    /// trail is not loaded.
    pub(crate) fn merge_module(&mut self, trail_id: &TrailId, module: TrailModule) -> bool {
        let Some(trail) = self.trails.get_mut(trail_id) else {
            return false;
        };
        trail.upsert_module(module);
        self.sync_summary(trail_id);
        true
    }

    pub(crate) fn record_generation(&mut self, id: &TrailId, status: TrailGenerationStatus) {
        if status.modules_generated > 0 {
            if let Some(summary) = self.active_trails.iter_mut().find(|s| &s.id == id) {
                if summary.status == TrailStatus::Generating {
                    summary.status = TrailStatus::Partial;
                }
            }
        }
        if let Some(message) = &status.error_message {
            self.error = Some(message.clone());
        }
        self.generation.insert(id.clone(), status);
        self.latest_generation = Some(id.clone());
    }

    /// Mark a trail as (re)generating locally.
    pub(crate) fn begin_generation(&mut self, id: &TrailId, language_code: &str, restart: bool) {
        if restart {
            if let Some(trail) = self.trails.get_mut(id) {
                if let Err(err) = trail.restart_generation() {
                    debug!(trail_id = %id, error = %err, "trail already generating, not restarted");
                }
            }
            if let Some(summary) = self.active_trails.iter_mut().find(|s| &s.id == id) {
                if summary.status.can_restart_to(TrailStatus::Generating) {
                    summary.status = TrailStatus::Generating;
                }
            }
        }
        self.generation_languages
            .insert(id.clone(), language_code.to_owned());
        self.record_generation(id, TrailGenerationStatus::queued());
    }

    pub(crate) fn clear_generation(&mut self, id: &TrailId) -> Option<TrailGenerationStatus> {
        self.generation_languages.remove(id);
        let removed = self.generation.remove(id);
        if self.latest_generation.as_ref() == Some(id) {
            self.latest_generation = self.generation.keys().next_back().cloned();
        }
        removed
    }

    /// Optimistically remove a trail from the active views.
    pub(crate) fn take_for_archive(&mut self, id: &TrailId) -> ArchiveRollback {
        let summary = self
            .active_trails
            .iter()
            .position(|s| &s.id == id)
            .map(|index| (index, self.active_trails.remove(index)));
        let language = self.generation_languages.get(id).cloned();
        ArchiveRollback {
            summary,
            trail: self.trails.remove(id),
            generation: self.clear_generation(id),
            language,
        }
    }

    pub(crate) fn restore_archived(&mut self, id: &TrailId, rollback: ArchiveRollback) {
        if let Some((index, summary)) = rollback.summary {
            let index = index.min(self.active_trails.len());
            self.active_trails.insert(index, summary);
        }
        if let Some(trail) = rollback.trail {
            self.trails.insert(id.clone(), trail);
        }
        if let Some(status) = rollback.generation {
            self.generation.insert(id.clone(), status);
            self.latest_generation = Some(id.clone());
        }
        if let Some(language) = rollback.language {
            self.generation_languages.insert(id.clone(), language);
        }
    }

    /// Apply a progress patch to a loaded lesson and rederive progress.
    ///
    /// Returns `Ok(None)` when the lesson is not part of any loaded trail.
    pub(crate) fn apply_lesson_patch(
        &mut self,
        lesson_id: &LessonId,
        patch: &LessonProgressPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<LessonRollback>, TrailStoreError> {
        let Some(trail_id) = self.trail_containing(lesson_id) else {
            return Ok(None);
        };
        let Some(trail) = self.trails.get_mut(&trail_id) else {
            return Ok(None);
        };

        let rollback = LessonRollback {
            trail: trail.clone(),
            summary: self.active_trails.iter().find(|s| s.id == trail_id).cloned(),
        };

        let Some((module_status, lesson)) = trail.lesson_mut(lesson_id) else {
            return Ok(None);
        };
        if patch.completed && module_status == ModuleStatus::Pending {
            return Err(TrailApiError::Conflict(format!(
                "lesson {lesson_id} belongs to a module that is still generating"
            ))
            .into());
        }
        lesson.apply_progress(patch, now)?;
        trail.recompute_progress();
        self.sync_summary(&trail_id);
        Ok(Some(rollback))
    }

    /// Replace a loaded lesson with the service's copy, keeping completion.
    pub(crate) fn reconcile_lesson(&mut self, authoritative: Lesson) -> Option<Lesson> {
        let trail_id = self.trail_containing(authoritative.id())?;
        let trail = self.trails.get_mut(&trail_id)?;
        let (_, lesson) = trail.lesson_mut(authoritative.id())?;
        lesson.reconcile(authoritative);
        let merged = lesson.clone();
        trail.recompute_progress();
        self.sync_summary(&trail_id);
        Some(merged)
    }

    pub(crate) fn restore_lesson(&mut self, rollback: LessonRollback) {
        let id = rollback.trail.id().clone();
        self.trails.insert(id.clone(), rollback.trail);
        match rollback.summary {
            Some(summary) => self.upsert_summary(summary),
            None => self.sync_summary(&id),
        }
    }

    fn trail_containing(&self, lesson_id: &LessonId) -> Option<TrailId> {
        self.trails
            .values()
            .find(|trail| trail.find_lesson(lesson_id).is_some())
            .map(|trail| trail.id().clone())
    }
}
