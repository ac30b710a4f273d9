// ⚠️ Errors - one kind per failure the caller can act on
//
// A rule table miss is not an error (it is `None`), and too little history is not an
// error either (the scorer degrades to a low-confidence verdict).

use crate::schema::ValidationError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// What went wrong while talking to the external classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierFailure {
    /// Connection, TLS, or request-building failure
    Transport,
    /// Provider answered with a non-success status (auth, quota, ...)
    Status,
    /// The per-call deadline elapsed
    Timeout,
    /// Reply was not valid JSON of the expected shape
    MalformedResponse,
    /// Reply named a label outside the fixed vocabulary
    VocabularyViolation,
}

impl ClassifierFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierFailure::Transport => "transport",
            ClassifierFailure::Status => "status",
            ClassifierFailure::Timeout => "timeout",
            ClassifierFailure::MalformedResponse => "malformed_response",
            ClassifierFailure::VocabularyViolation => "vocabulary_violation",
        }
    }
}

impl fmt::Display for ClassifierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum DetectionError {
    #[error("invalid request: {}", join_validation(.0))]
    Validation(Vec<ValidationError>),

    #[error("external classification failed ({failure}): {message}")]
    ExternalClassification {
        failure: ClassifierFailure,
        message: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

fn join_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl DetectionError {
    pub fn external(failure: ClassifierFailure, message: impl Into<String>) -> Self {
        DetectionError::ExternalClassification {
            failure,
            message: message.into(),
        }
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            DetectionError::Validation(_) => "validation_error",
            DetectionError::ExternalClassification { .. } => "external_classification_error",
            DetectionError::Configuration(_) => "configuration_error",
        }
    }

    pub fn classifier_failure(&self) -> Option<ClassifierFailure> {
        match self {
            DetectionError::ExternalClassification { failure, .. } => Some(*failure),
            _ => None,
        }
    }
}

impl From<Vec<ValidationError>> for DetectionError {
    fn from(errors: Vec<ValidationError>) -> Self {
        DetectionError::Validation(errors)
    }
}

pub type Result<T> = std::result::Result<T, DetectionError>;
