use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::EvaluationStatus;

/// A single field-level rule violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Collects every violated rule in one pass so a caller can report them
/// together instead of one round trip per field.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("validation failed: {}", .violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; "))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation::new(field, message)],
        }
    }

    /// True when the given field appears among the violations.
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

/// A required metric left unanswered at submit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingMetric {
    pub metric_type_id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("metric type code '{code}' is already in use")]
    Conflict { code: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("metric type {metric_type_id} is not applicable to evaluation {evaluation_id}")]
    NotApplicable {
        evaluation_id: i64,
        metric_type_id: i64,
    },

    #[error("evaluation {id} is {actual}; operation requires {expected}")]
    InvalidState {
        id: i64,
        actual: EvaluationStatus,
        expected: EvaluationStatus,
    },

    #[error("evaluation {evaluation_id} is missing required metrics: {}", .missing.iter().map(|m| m.code.as_str()).collect::<Vec<_>>().join(", "))]
    Incomplete {
        evaluation_id: i64,
        missing: Vec<MissingMetric>,
    },

    /// Stored data contradicts its own definition, e.g. a value row whose
    /// populated column does not match the metric kind. Surfaced as-is so
    /// corruption is never coerced into an ordinary validation failure.
    #[error("data corruption detected: {detail}")]
    InvariantViolation { detail: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}
