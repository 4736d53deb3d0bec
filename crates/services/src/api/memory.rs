use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use trail_core::Clock;
use trail_core::model::{
    GenerateTrailRequest, GenerationStarted, Lesson, LessonId, LessonProgressPatch, ModuleId,
    ModuleStatus, Trail, TrailGenerationStatus, TrailId, TrailLanguage, TrailModule, TrailStatus,
    TrailSummary,
};

use super::TrailApi;
use crate::config::MAX_ACTIVE_TRAILS;
use crate::error::TrailApiError;

/// What a finished generation produces for one language.
#[derive(Debug, Clone)]
pub struct TrailBlueprint {
    pub language: TrailLanguage,
    pub modules: Vec<TrailModule>,
    pub estimated_duration_minutes: Option<u32>,
}

impl TrailBlueprint {
    #[must_use]
    pub fn new(language: TrailLanguage, modules: Vec<TrailModule>) -> Self {
        Self {
            language,
            modules,
            estimated_duration_minutes: None,
        }
    }

    /// The blueprint's modules with every lesson reserved but not generated.
    fn placeholder_modules(&self) -> Vec<TrailModule> {
        self.modules
            .iter()
            .map(|module| {
                let lessons = module
                    .lessons()
                    .iter()
                    .map(|lesson| {
                        Lesson::placeholder(
                            lesson.id().clone(),
                            lesson.title(),
                            lesson.kind(),
                            lesson.duration_minutes(),
                        )
                    })
                    .collect();
                module
                    .clone()
                    .with_lessons(lessons)
                    .with_status(ModuleStatus::Pending)
            })
            .collect()
    }

    fn ready_modules(&self, count: usize) -> impl Iterator<Item = TrailModule> + '_ {
        let mut sorted: Vec<&TrailModule> = self.modules.iter().collect();
        sorted.sort_by_key(|module| module.order_index());
        sorted
            .into_iter()
            .take(count)
            .map(|module| module.clone().with_status(ModuleStatus::Ready))
    }
}

/// One scripted answer to a generation status check.
#[derive(Debug, Clone)]
pub enum ScriptedStatus {
    Report(TrailGenerationStatus),
    Unavailable,
}

/// Operations that can be told to fail once with `Unavailable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListActive,
    GetTrail,
    GetModule,
    Generate,
    Archive,
    UpdateProgress,
}

#[derive(Default)]
struct MemoryState {
    trails: Vec<Trail>,
    blueprints: HashMap<String, TrailBlueprint>,
    scripts: HashMap<TrailId, VecDeque<ScriptedStatus>>,
    failures: HashSet<Operation>,
    status_checks: HashMap<TrailId, usize>,
    generate_calls: usize,
    next_id: u64,
}

impl MemoryState {
    fn fail_if_armed(&mut self, operation: Operation) -> Result<(), TrailApiError> {
        if self.failures.remove(&operation) {
            return Err(TrailApiError::Unavailable(format!("{operation:?} failed")));
        }
        Ok(())
    }

    fn trail_mut(&mut self, id: &TrailId) -> Result<&mut Trail, TrailApiError> {
        self.trails
            .iter_mut()
            .find(|trail| trail.id() == id)
            .ok_or_else(|| TrailApiError::not_found("trail", id))
    }

    fn active_count(&self) -> usize {
        self.trails
            .iter()
            .filter(|trail| trail.status().is_active())
            .count()
    }

    fn blueprint_for(&self, trail: &Trail) -> Option<TrailBlueprint> {
        self.blueprints
            .get(&trail.language().language_code)
            .cloned()
    }
}

/// In-process stand-in for the remote trail service.
///
/// Follows the remote contract (quota, in-place regeneration, idempotent
/// archive, monotonic completion) and lets tests script generation progress.
/// Without a script, a status check completes generation immediately.
#[derive(Clone, Default)]
pub struct InMemoryTrailApi {
    state: Arc<Mutex<MemoryState>>,
    clock: Clock,
    latency: Option<Duration>,
}

impl InMemoryTrailApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Delay every status check, to exercise in-flight cancellation.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, TrailApiError> {
        self.state
            .lock()
            .map_err(|e| TrailApiError::Unavailable(e.to_string()))
    }

    /// Register what generation produces for a language.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::Unavailable` if the state lock is poisoned.
    pub fn add_blueprint(&self, blueprint: TrailBlueprint) -> Result<(), TrailApiError> {
        let mut state = self.lock()?;
        state
            .blueprints
            .insert(blueprint.language.language_code.clone(), blueprint);
        Ok(())
    }

    /// Insert an existing trail, e.g. one generated in an earlier session.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::Unavailable` if the state lock is poisoned.
    pub fn seed_trail(&self, trail: Trail) -> Result<(), TrailApiError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        state.trails.retain(|existing| existing.id() != trail.id());
        state.trails.push(trail);
        Ok(())
    }

    /// Queue answers for the next status checks of `trail_id`.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::Unavailable` if the state lock is poisoned.
    pub fn script_generation(
        &self,
        trail_id: &TrailId,
        steps: impl IntoIterator<Item = ScriptedStatus>,
    ) -> Result<(), TrailApiError> {
        let mut state = self.lock()?;
        state
            .scripts
            .entry(trail_id.clone())
            .or_default()
            .extend(steps);
        Ok(())
    }

    /// Make the next call of `operation` fail with `Unavailable`.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::Unavailable` if the state lock is poisoned.
    pub fn fail_next(&self, operation: Operation) -> Result<(), TrailApiError> {
        self.lock()?.failures.insert(operation);
        Ok(())
    }

    #[must_use]
    pub fn status_checks(&self, trail_id: &TrailId) -> usize {
        self.lock()
            .map(|state| state.status_checks.get(trail_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    #[must_use]
    pub fn generate_calls(&self) -> usize {
        self.lock().map(|state| state.generate_calls).unwrap_or(0)
    }

    /// Current server-side copy of a trail.
    #[must_use]
    pub fn trail(&self, id: &TrailId) -> Option<Trail> {
        self.lock()
            .ok()?
            .trails
            .iter()
            .find(|trail| trail.id() == id)
            .cloned()
    }

    fn apply_generation_step(
        trail: &mut Trail,
        blueprint: Option<&TrailBlueprint>,
        status: &TrailGenerationStatus,
    ) {
        let Some(blueprint) = blueprint else {
            return;
        };
        if status.is_complete() {
            for module in blueprint.ready_modules(blueprint.modules.len()) {
                trail.upsert_module(module);
            }
            let _ = trail.advance_to(TrailStatus::Ready);
            return;
        }

        let generated = usize::try_from(status.modules_generated).unwrap_or(usize::MAX);
        if generated > 0 {
            for module in blueprint.ready_modules(generated) {
                trail.upsert_module(module);
            }
            let _ = trail.advance_to(TrailStatus::Partial);
        }
    }
}

#[async_trait]
impl TrailApi for InMemoryTrailApi {
    async fn list_active_trails(&self) -> Result<Vec<TrailSummary>, TrailApiError> {
        let mut state = self.lock()?;
        state.fail_if_armed(Operation::ListActive)?;
        Ok(state
            .trails
            .iter()
            .filter(|trail| trail.status().is_active())
            .map(Trail::summary)
            .collect())
    }

    async fn get_trail(&self, id: &TrailId) -> Result<Trail, TrailApiError> {
        let mut state = self.lock()?;
        state.fail_if_armed(Operation::GetTrail)?;
        Ok(state.trail_mut(id)?.clone())
    }

    async fn get_module(
        &self,
        trail_id: &TrailId,
        module_id: &ModuleId,
    ) -> Result<TrailModule, TrailApiError> {
        let mut state = self.lock()?;
        state.fail_if_armed(Operation::GetModule)?;
        state
            .trail_mut(trail_id)?
            .module(module_id)
            .cloned()
            .ok_or_else(|| TrailApiError::not_found("module", module_id))
    }

    async fn get_lesson(&self, id: &LessonId) -> Result<Lesson, TrailApiError> {
        let state = self.lock()?;
        state
            .trails
            .iter()
            .find_map(|trail| trail.find_lesson(id).map(|(_, lesson)| lesson.clone()))
            .ok_or_else(|| TrailApiError::not_found("lesson", id))
    }

    async fn generate_trail(
        &self,
        request: &GenerateTrailRequest,
    ) -> Result<GenerationStarted, TrailApiError> {
        let limit = MAX_ACTIVE_TRAILS;
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.fail_if_armed(Operation::Generate)?;
        state.generate_calls += 1;

        let existing = state.trails.iter().position(|trail| {
            trail.status().is_active() && trail.language().language_code == request.language_code
        });

        if let Some(index) = existing {
            let blueprint = state.blueprint_for(&state.trails[index]);
            let trail = &mut state.trails[index];
            if request.force_regenerate && trail.status() == TrailStatus::Ready {
                trail
                    .restart_generation()
                    .map_err(|e| TrailApiError::Conflict(e.to_string()))?;
                if let Some(blueprint) = blueprint {
                    *trail = trail.clone().with_modules(blueprint.placeholder_modules());
                }
            }
            return Ok(GenerationStarted {
                trail_id: trail.id().clone(),
            });
        }

        if state.active_count() >= limit {
            return Err(TrailApiError::QuotaExceeded { limit });
        }

        let blueprint = state
            .blueprints
            .get(&request.language_code)
            .cloned()
            .ok_or_else(|| TrailApiError::not_found("language", &request.language_code))?;

        state.next_id += 1;
        let id = TrailId::new(format!("T{}", state.next_id));
        let mut trail = Trail::new(id.clone(), blueprint.language.clone(), now)
            .with_modules(blueprint.placeholder_modules());
        if let Some(minutes) = blueprint.estimated_duration_minutes {
            trail = trail.with_estimated_duration(minutes);
        }
        state.trails.push(trail);

        Ok(GenerationStarted { trail_id: id })
    }

    async fn generation_status(
        &self,
        id: &TrailId,
    ) -> Result<TrailGenerationStatus, TrailApiError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock()?;
        *state.status_checks.entry(id.clone()).or_default() += 1;
        let step = state.scripts.get_mut(id).and_then(VecDeque::pop_front);
        let current = state.trail_mut(id)?.clone();
        let blueprint = state.blueprint_for(&current);

        let status = match step {
            Some(ScriptedStatus::Unavailable) => {
                return Err(TrailApiError::Unavailable("status check failed".into()));
            }
            Some(ScriptedStatus::Report(status)) => status,
            None => {
                let total_modules = u32::try_from(
                    blueprint
                        .as_ref()
                        .map_or(current.modules().len(), |b| b.modules.len()),
                )
                .unwrap_or(u32::MAX);
                TrailGenerationStatus {
                    progress_percentage: 100,
                    current_step: "ready".into(),
                    modules_generated: total_modules,
                    total_modules,
                    ..TrailGenerationStatus::default()
                }
            }
        };

        let trail = state.trail_mut(id)?;
        if trail.status().is_generating() {
            Self::apply_generation_step(trail, blueprint.as_ref(), &status);
        }
        Ok(status)
    }

    async fn archive_trail(&self, id: &TrailId) -> Result<(), TrailApiError> {
        let mut state = self.lock()?;
        state.fail_if_armed(Operation::Archive)?;
        let trail = state.trail_mut(id)?;
        if trail.status() != TrailStatus::Archived {
            trail
                .advance_to(TrailStatus::Archived)
                .map_err(|e| TrailApiError::Conflict(e.to_string()))?;
        }
        Ok(())
    }

    async fn update_lesson_progress(
        &self,
        id: &LessonId,
        patch: &LessonProgressPatch,
    ) -> Result<Lesson, TrailApiError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.fail_if_armed(Operation::UpdateProgress)?;

        for trail in &mut state.trails {
            let Some((module_status, lesson)) = trail.lesson_mut(id) else {
                continue;
            };
            if patch.completed && module_status == ModuleStatus::Pending {
                return Err(TrailApiError::Conflict(format!(
                    "lesson {id} belongs to a module that is still generating"
                )));
            }
            lesson
                .apply_progress(patch, now)
                .map_err(|e| TrailApiError::Conflict(e.to_string()))?;
            let updated = lesson.clone();
            trail.recompute_progress();
            return Ok(updated);
        }

        Err(TrailApiError::not_found("lesson", id))
    }
}
