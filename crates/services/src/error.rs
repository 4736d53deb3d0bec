//! Shared error types for the services crate.

use thiserror::Error;

use trail_core::model::LessonError;

/// Errors emitted by `TrailApi` implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrailApiError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("active trail limit of {limit} reached")]
    QuotaExceeded { limit: usize },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("trail service responded with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("trail service unavailable: {0}")]
    Unavailable(String),
}

impl TrailApiError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Network and server-side failures that may succeed on a later attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            TrailApiError::HttpStatus(status) => status.is_server_error(),
            TrailApiError::Http(_) | TrailApiError::Unavailable(_) => true,
            TrailApiError::NotFound { .. }
            | TrailApiError::QuotaExceeded { .. }
            | TrailApiError::Conflict(_) => false,
        }
    }
}

/// Errors emitted by `TrailStore` commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrailStoreError {
    #[error(transparent)]
    Api(#[from] TrailApiError),
    #[error(transparent)]
    Lesson(#[from] LessonError),
    #[error("trail store has been disposed")]
    Disposed,
}

impl TrailStoreError {
    #[must_use]
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, TrailStoreError::Api(TrailApiError::QuotaExceeded { .. }))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, TrailStoreError::Api(TrailApiError::Conflict(_)))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrailStoreError::Api(TrailApiError::NotFound { .. }))
    }
}

/// Errors raised while reading service configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} is not set")]
    Missing { var: &'static str },
    #[error("invalid {var} value: {raw}")]
    Invalid { var: &'static str, raw: String },
}
