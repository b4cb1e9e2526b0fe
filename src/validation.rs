//! Pure value validation against a metric definition. No storage access;
//! the lifecycle runs these checks against the evaluation's snapshot before
//! anything is written.

use crate::db::models::{EvaluationMetric, MetricKind, MetricValue};
use crate::error::{FieldViolation, ValidationError};

/// Decide whether a candidate answer is well-formed and in range for the
/// given metric. Collects every violated rule; the field name is the metric
/// code so a host can attach messages to the right input.
pub fn validate_value(
    metric: &EvaluationMetric,
    value: &MetricValue,
) -> Result<(), ValidationError> {
    let mut violations: Vec<FieldViolation> = Vec::new();

    match (metric.kind, value) {
        // Clearing an answer is always legal; required-ness is enforced at
        // submit time, not per upsert.
        (_, MetricValue::Unanswered) => {}

        (MetricKind::Numeric, MetricValue::Numeric(v))
        | (MetricKind::Percentage, MetricValue::Numeric(v)) => {
            if !v.is_finite() {
                violations.push(FieldViolation::new(&metric.code, "value must be a number"));
            } else {
                if metric.kind == MetricKind::Percentage && !(0.0..=100.0).contains(v) {
                    violations.push(FieldViolation::new(
                        &metric.code,
                        "percentage must be between 0 and 100",
                    ));
                }
                if let Some(min) = metric.min_value {
                    if *v < min {
                        violations.push(FieldViolation::new(
                            &metric.code,
                            format!("value must be at least {}", min),
                        ));
                    }
                }
                if let Some(max) = metric.max_value {
                    if *v > max {
                        violations.push(FieldViolation::new(
                            &metric.code,
                            format!("value must be at most {}", max),
                        ));
                    }
                }
            }
        }

        (MetricKind::Rating, MetricValue::Numeric(v)) => {
            if !v.is_finite() || !(0.0..=5.0).contains(v) {
                violations.push(FieldViolation::new(
                    &metric.code,
                    "rating must be between 0 and 5",
                ));
            } else if (v * 2.0).fract().abs() > f64::EPSILON {
                violations.push(FieldViolation::new(
                    &metric.code,
                    "rating must be given in half-point steps",
                ));
            }
        }

        (MetricKind::Boolean, MetricValue::Boolean(_)) => {}

        (MetricKind::Text, MetricValue::Text(s)) => {
            if metric.is_required && s.trim().is_empty() {
                violations.push(FieldViolation::new(
                    &metric.code,
                    "required text metric must not be blank",
                ));
            }
        }

        (kind, _) => {
            violations.push(FieldViolation::new(
                &metric.code,
                format!("value does not match metric kind {}", kind),
            ));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(violations))
    }
}

/// Whether a value counts as an answer for completeness purposes. `false`
/// is an answer for BOOLEAN metrics; blank text is not an answer for TEXT.
pub fn is_answered(metric: &EvaluationMetric, value: &MetricValue) -> bool {
    match (metric.kind, value) {
        (MetricKind::Numeric, MetricValue::Numeric(_))
        | (MetricKind::Rating, MetricValue::Numeric(_))
        | (MetricKind::Percentage, MetricValue::Numeric(_))
        | (MetricKind::Boolean, MetricValue::Boolean(_)) => true,
        (MetricKind::Text, MetricValue::Text(s)) => !s.trim().is_empty(),
        _ => false,
    }
}
