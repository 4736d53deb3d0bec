//! Progress aggregation over a trail's nested lessons.
//!
//! Everything here is a pure function of its input: callers recompute a
//! `TrailProgress` whenever lesson data changes instead of editing one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Lesson, TrailModule};

/// Derived completion statistics for a trail (or any set of modules).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailProgress {
    pub progress_percentage: u8,
    pub lessons_completed: u32,
    pub total_lessons: u32,
    pub average_score: Option<f64>,
    pub time_spent_minutes: u32,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl TrailProgress {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_lessons > 0 && self.lessons_completed == self.total_lessons
    }
}

/// Running totals for lessons fed one at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressTally {
    total: u64,
    completed: u64,
    score_sum: u64,
    scored: u64,
    seconds: u64,
    last_activity_at: Option<DateTime<Utc>>,
}

impl ProgressTally {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one lesson. Placeholders count toward the total.
    pub fn add_lesson(&mut self, lesson: &Lesson) {
        self.total += 1;
        let Some(completed_at) = lesson.completed_at() else {
            return;
        };

        self.completed += 1;
        if let Some(score) = lesson.score() {
            self.score_sum += u64::from(score);
            self.scored += 1;
        }
        self.seconds += u64::from(lesson.time_spent_seconds().unwrap_or(0));
        self.last_activity_at = Some(match self.last_activity_at {
            Some(current) => current.max(completed_at),
            None => completed_at,
        });
    }

    pub fn add_modules<'a>(&mut self, modules: impl IntoIterator<Item = &'a TrailModule>) {
        for module in modules {
            for lesson in module.lessons() {
                self.add_lesson(lesson);
            }
        }
    }

    #[must_use]
    pub fn finish(&self) -> TrailProgress {
        #[allow(clippy::cast_precision_loss)]
        let average_score = (self.scored > 0).then(|| self.score_sum as f64 / self.scored as f64);

        TrailProgress {
            progress_percentage: rounded_percentage(self.completed, self.total),
            lessons_completed: saturate(self.completed),
            total_lessons: saturate(self.total),
            average_score,
            time_spent_minutes: saturate(self.seconds / 60),
            last_activity_at: self.last_activity_at,
        }
    }
}

/// Compute progress for a trail's modules.
#[must_use]
pub fn compute_progress(modules: &[TrailModule]) -> TrailProgress {
    let mut tally = ProgressTally::new();
    tally.add_modules(modules);
    tally.finish()
}

/// `round(100 * part / whole)` with halves rounded up, `0` for an empty whole.
#[must_use]
pub fn rounded_percentage(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 0;
    }
    let part = part.min(whole);
    let pct = (200 * part + whole) / (2 * whole);
    u8::try_from(pct).unwrap_or(100)
}

fn saturate(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
