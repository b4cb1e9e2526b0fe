//! Configurable performance-evaluation engine.
//!
//! Administrators define typed metrics per position type in the catalog;
//! evaluators fill in values for one employee and period, validated against
//! the definitions, aggregated into a weighted overall score and carried
//! through a draft/submitted lifecycle. The crate is a library: a host
//! service owns transport, identity and presentation.

pub mod analytics;
pub mod catalog;
pub mod csv_import;
pub mod db;
pub mod error;
pub mod evaluation;
pub mod scoring;
pub mod validation;

pub use db::models::{
    CreateEvaluation, CreateMetricType, Evaluation, EvaluationDetail, EvaluationMetric,
    EvaluationPeriod, EvaluationStatus, MetricKind, MetricType, MetricValue, UpdateMetricType,
};
pub use db::Database;
pub use error::{EngineError, FieldViolation, MissingMetric, ValidationError};
