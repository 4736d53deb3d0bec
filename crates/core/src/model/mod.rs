mod enrollment;
mod generation;
mod ids;
mod lesson;
mod module;
mod trail;

pub use enrollment::LanguageEnrollment;
pub use generation::{GenerateTrailRequest, GenerationStarted, TrailGenerationStatus};
pub use ids::{LessonId, ModuleId, ParseIdError, TrailId};
pub use lesson::{Lesson, LessonError, LessonProgressPatch, LessonType};
pub use module::{ModuleStatus, TrailModule};
pub use trail::{Trail, TrailError, TrailLanguage, TrailStatus, TrailSummary};
