use serde::{Deserialize, Serialize};

use crate::model::ids::{LessonId, ModuleId};
use crate::model::lesson::Lesson;

/// Generation state of a single module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleStatus {
    /// Lessons are still being generated.
    Pending,
    /// Every lesson slot holds real content.
    Ready,
}

/// A thematic grouping of lessons, unlocked in `order_index` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailModule {
    id: ModuleId,
    title: String,
    #[serde(default)]
    description: Option<String>,
    competency_code: String,
    competency_name: String,
    order_index: u32,
    status: ModuleStatus,
    #[serde(default)]
    lessons: Vec<Lesson>,
}

impl TrailModule {
    #[must_use]
    pub fn new(
        id: ModuleId,
        title: impl Into<String>,
        competency_code: impl Into<String>,
        competency_name: impl Into<String>,
        order_index: u32,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            description: None,
            competency_code: competency_code.into(),
            competency_name: competency_name.into(),
            order_index,
            status: ModuleStatus::Pending,
            lessons: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ModuleStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_lessons(mut self, lessons: Vec<Lesson>) -> Self {
        self.lessons = lessons;
        self
    }

    #[must_use]
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn competency_code(&self) -> &str {
        &self.competency_code
    }

    #[must_use]
    pub fn competency_name(&self) -> &str {
        &self.competency_name
    }

    #[must_use]
    pub fn order_index(&self) -> u32 {
        self.order_index
    }

    #[must_use]
    pub fn status(&self) -> ModuleStatus {
        self.status
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ModuleStatus::Pending
    }

    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    #[must_use]
    pub fn lesson(&self, id: &LessonId) -> Option<&Lesson> {
        self.lessons.iter().find(|lesson| lesson.id() == id)
    }

    pub fn lesson_mut(&mut self, id: &LessonId) -> Option<&mut Lesson> {
        self.lessons.iter_mut().find(|lesson| lesson.id() == id)
    }

    #[must_use]
    pub fn has_placeholders(&self) -> bool {
        self.lessons.iter().any(Lesson::is_placeholder)
    }

    /// A module cannot be `Ready` while it still holds placeholder lessons.
    ///
    /// Returns `true` if the status had to be downgraded.
    pub fn normalize_status(&mut self) -> bool {
        if self.status == ModuleStatus::Ready && self.has_placeholders() {
            self.status = ModuleStatus::Pending;
            return true;
        }
        false
    }

    /// Take an incoming copy of this module while keeping completion facts
    /// the incoming copy does not carry.
    pub fn reconcile(&mut self, incoming: TrailModule) {
        let previous = std::mem::replace(self, incoming);
        for lesson in &mut self.lessons {
            if let Some(known) = previous.lesson(lesson.id()) {
                let mut merged = known.clone();
                merged.reconcile(lesson.clone());
                *lesson = merged;
            }
        }
        self.normalize_status();
    }
}
