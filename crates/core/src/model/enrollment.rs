use serde::{Deserialize, Serialize};

/// A learner's registration in one language, supplied by the enrollment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageEnrollment {
    pub language_code: String,
    pub language_name: String,
    #[serde(default)]
    pub native_name: Option<String>,
    pub level_code: String,
    #[serde(default)]
    pub level_name: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

impl LanguageEnrollment {
    #[must_use]
    pub fn new(language_code: impl Into<String>, level_code: impl Into<String>) -> Self {
        let language_code = language_code.into();
        Self {
            language_name: language_code.clone(),
            language_code,
            native_name: None,
            level_code: level_code.into(),
            level_name: None,
            is_primary: false,
        }
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }
}
