use serde_json::json;
use thiserror::Error;

/// Failures raised by the grading and promotion engine.
///
/// Batch operations never return these for individual students; they fold
/// them into their summaries instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("score {0} is outside 0..=100")]
    InvalidScore(f64),

    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("no subject results recorded for this term")]
    NoResultsForTerm { student_id: String, term_id: String },

    #[error("no grading scale covers score {0}")]
    NoMatchingScale(f64),

    #[error("promotion policy changed since candidates were evaluated")]
    StalePolicy { expected: String, current: String },

    #[error("database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error(transparent)]
    Settings(#[from] anyhow::Error),
}

impl EngineError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: &str) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable wire code for the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "bad_params",
            EngineError::InvalidScore(_) => "invalid_score",
            EngineError::NotFound { .. } => "not_found",
            EngineError::NoResultsForTerm { .. } => "no_results_for_term",
            EngineError::NoMatchingScale(_) => "no_matching_scale",
            EngineError::StalePolicy { .. } => "stale_policy",
            EngineError::Persistence(_) => "db_query_failed",
            EngineError::Settings(_) => "settings_invalid",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::Validation { field, .. } => Some(json!({ "field": field })),
            EngineError::InvalidScore(score) => Some(json!({ "score": score })),
            EngineError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            EngineError::NoResultsForTerm {
                student_id,
                term_id,
            } => Some(json!({ "studentId": student_id, "termId": term_id })),
            EngineError::NoMatchingScale(score) => Some(json!({ "score": score })),
            EngineError::StalePolicy { expected, current } => {
                Some(json!({ "expected": expected, "current": current }))
            }
            EngineError::Persistence(_) | EngineError::Settings(_) => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
