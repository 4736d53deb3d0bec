//! Canned data for `trails --demo`, served by `InMemoryTrailApi`.

use services::api::{InMemoryTrailApi, ScriptedStatus, TrailBlueprint};
use services::{Clock, TrailApiError};
use trail_core::model::{
    Lesson, LessonId, LessonType, ModuleId, ModuleStatus, Trail, TrailGenerationStatus, TrailId,
    TrailLanguage, TrailModule, TrailStatus,
};

const TOPICS: [(&str, &str, &str); 4] = [
    ("A2.1", "Greetings", "Meeting people"),
    ("A2.2", "Food", "Ordering at a restaurant"),
    ("A2.3", "Travel", "Getting around town"),
    ("A2.4", "Work", "Talking about your job"),
];

const LESSON_KINDS: [LessonType; 3] = [
    LessonType::Vocabulary,
    LessonType::Grammar,
    LessonType::Conversation,
];

fn language(code: &str, name: &str) -> TrailLanguage {
    TrailLanguage {
        language_code: code.to_owned(),
        language_name: name.to_owned(),
        language_flag: code.to_owned(),
        level_code: "A2".to_owned(),
        level_name: "Elementary".to_owned(),
    }
}

fn modules(code: &str) -> Vec<TrailModule> {
    TOPICS
        .iter()
        .zip(0u32..)
        .map(|(&(competency, name, title), index)| {
            let lessons = LESSON_KINDS
                .iter()
                .zip(0u32..)
                .map(|(&kind, slot)| {
                    Lesson::new(
                        LessonId::new(format!("{code}-{}-{}", index + 1, slot + 1)),
                        format!("{title} {}", slot + 1),
                        kind,
                        10 + 5 * slot,
                    )
                })
                .collect();
            TrailModule::new(
                ModuleId::new(format!("{code}-m{}", index + 1)),
                title,
                competency,
                name,
                index,
            )
            .with_lessons(lessons)
            .with_status(ModuleStatus::Ready)
        })
        .collect()
}

fn step(pct: u8, modules_generated: u32, current_step: &str) -> ScriptedStatus {
    ScriptedStatus::Report(TrailGenerationStatus {
        progress_percentage: pct,
        current_step: current_step.to_owned(),
        modules_generated,
        total_modules: 4,
        lessons_generated: modules_generated * 3,
        total_lessons: 12,
        error_message: None,
    })
}

/// A demo backend with one finished Spanish trail and blueprints for more.
///
/// # Errors
///
/// Returns `TrailApiError` if the in-memory state cannot be seeded.
pub fn backend(clock: Clock) -> Result<InMemoryTrailApi, TrailApiError> {
    let api = InMemoryTrailApi::new().with_clock(clock);

    for (code, name) in [("es", "Spanish"), ("fr", "French"), ("de", "German"), ("it", "Italian")]
    {
        api.add_blueprint(TrailBlueprint {
            estimated_duration_minutes: Some(180),
            ..TrailBlueprint::new(language(code, name), modules(code))
        })?;
    }

    let mut spanish = Trail::new(TrailId::new("T1"), language("es", "Spanish"), clock.now())
        .with_modules(modules("es"))
        .with_estimated_duration(180);
    spanish
        .advance_to(TrailStatus::Ready)
        .map_err(|e| TrailApiError::Conflict(e.to_string()))?;
    api.seed_trail(spanish)?;

    // The next generated trail walks through a few visible steps.
    api.script_generation(
        &TrailId::new("T2"),
        [
            step(10, 0, "planning"),
            step(25, 1, "writing lessons"),
            ScriptedStatus::Unavailable,
            step(50, 2, "writing lessons"),
            step(75, 3, "writing lessons"),
            step(100, 4, "done"),
        ],
    )?;
    Ok(api)
}
