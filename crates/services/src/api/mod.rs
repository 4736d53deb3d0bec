//! Query/command interface to the remote trail service.
//!
//! Implementations own no client-side state beyond what they need to talk to
//! the service; `TrailStore` is the only place trails are cached.

mod http;
mod memory;

use async_trait::async_trait;
use trail_core::model::{
    GenerateTrailRequest, GenerationStarted, Lesson, LessonId, LessonProgressPatch, ModuleId,
    Trail, TrailGenerationStatus, TrailId, TrailModule, TrailSummary,
};

use crate::error::TrailApiError;

pub use http::HttpTrailApi;
pub use memory::{InMemoryTrailApi, Operation, ScriptedStatus, TrailBlueprint};

/// Remote contract for trails, modules, lessons and generation jobs.
#[async_trait]
pub trait TrailApi: Send + Sync {
    /// All non-archived trails of the current learner, in creation order.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError` for transport or server failures.
    async fn list_active_trails(&self) -> Result<Vec<TrailSummary>, TrailApiError>;

    /// Fetch a full trail.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::NotFound` for unknown or foreign trails.
    async fn get_trail(&self, id: &TrailId) -> Result<Trail, TrailApiError>;

    /// Fetch one module of a trail.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::NotFound` for unknown identifiers.
    async fn get_module(
        &self,
        trail_id: &TrailId,
        module_id: &ModuleId,
    ) -> Result<TrailModule, TrailApiError>;

    /// Fetch one lesson.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::NotFound` for unknown identifiers.
    async fn get_lesson(&self, id: &LessonId) -> Result<Lesson, TrailApiError>;

    /// Queue generation for a language, or restart an existing trail in place
    /// when `force_regenerate` is set.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::QuotaExceeded` when a new trail would exceed the
    /// active-trail limit.
    async fn generate_trail(
        &self,
        request: &GenerateTrailRequest,
    ) -> Result<GenerationStarted, TrailApiError>;

    /// Current state of a trail's generation job.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError` for transport or server failures.
    async fn generation_status(&self, id: &TrailId)
    -> Result<TrailGenerationStatus, TrailApiError>;

    /// Soft-delete a trail. Archiving an archived trail is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::NotFound` for unknown trails.
    async fn archive_trail(&self, id: &TrailId) -> Result<(), TrailApiError>;

    /// Report progress on a lesson and return the authoritative lesson.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::Conflict` when completing a lesson whose module
    /// is still pending.
    async fn update_lesson_progress(
        &self,
        id: &LessonId,
        patch: &LessonProgressPatch,
    ) -> Result<Lesson, TrailApiError>;
}
