use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::EngineError;

/// The five data kinds a metric definition can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum MetricKind {
    Numeric,
    Rating,
    Percentage,
    Boolean,
    Text,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Numeric => "NUMERIC",
            MetricKind::Rating => "RATING",
            MetricKind::Percentage => "PERCENTAGE",
            MetricKind::Boolean => "BOOLEAN",
            MetricKind::Text => "TEXT",
        }
    }

    /// Kinds whose answers contribute to the weighted overall score.
    pub fn is_numeric_bearing(&self) -> bool {
        matches!(
            self,
            MetricKind::Numeric | MetricKind::Rating | MetricKind::Percentage
        )
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum EvaluationPeriod {
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum EvaluationStatus {
    Draft,
    Submitted,
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EvaluationStatus::Draft => "DRAFT",
            EvaluationStatus::Submitted => "SUBMITTED",
        })
    }
}

/// An administrator-defined definition of one measurable attribute.
///
/// `position_types` is a JSON array of position-type tags; an empty array
/// means the metric applies to every position type.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MetricType {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub kind: MetricKind,
    pub unit: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub weight: f64,
    pub is_required: bool,
    pub is_active: bool,
    pub display_order: i64,
    pub position_types: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MetricType {
    /// Decoded scope list; an empty list applies to all position types.
    pub fn applicable_position_types(&self) -> Vec<String> {
        serde_json::from_str(&self.position_types).unwrap_or_default()
    }
}

/// One scoring event for one employee over one period.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Evaluation {
    pub id: i64,
    pub personnel_id: i64,
    pub evaluator_id: i64,
    pub position_type: String,
    pub evaluation_date: NaiveDate,
    pub period: EvaluationPeriod,
    pub comments: Option<String>,
    pub status: EvaluationStatus,
    pub overall_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the applicable-set snapshot captured when an evaluation is
/// created. Carries the full definition as it stood at that moment, so later
/// catalog edits do not change what the evaluation reports against.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EvaluationMetric {
    pub evaluation_id: i64,
    pub metric_type_id: i64,
    pub code: String,
    pub name: String,
    pub kind: MetricKind,
    pub unit: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub weight: f64,
    pub is_required: bool,
    pub display_order: i64,
}

/// Stored form of one answer. Exactly one of the three value columns is
/// populated, selected by the snapshot metric's kind; all three NULL means
/// the metric is unanswered (a row may exist to carry only a comment).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MetricValueRow {
    pub id: i64,
    pub evaluation_id: i64,
    pub metric_type_id: i64,
    pub numeric_value: Option<f64>,
    pub text_value: Option<String>,
    pub boolean_value: Option<bool>,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MetricValueRow {
    /// Reconstruct the tagged value, checking the stored columns against the
    /// metric's kind. A populated column that disagrees with the kind is
    /// reported as data corruption, not coerced.
    pub fn value(&self, metric: &EvaluationMetric) -> Result<MetricValue, EngineError> {
        match (
            self.numeric_value,
            self.text_value.as_ref(),
            self.boolean_value,
        ) {
            (None, None, None) => Ok(MetricValue::Unanswered),
            (Some(v), None, None) if metric.kind.is_numeric_bearing() => {
                Ok(MetricValue::Numeric(v))
            }
            (None, Some(v), None) if metric.kind == MetricKind::Text => {
                Ok(MetricValue::Text(v.clone()))
            }
            (None, None, Some(v)) if metric.kind == MetricKind::Boolean => {
                Ok(MetricValue::Boolean(v))
            }
            _ => Err(EngineError::InvariantViolation {
                detail: format!(
                    "stored value for metric '{}' does not match kind {}",
                    metric.code, metric.kind
                ),
            }),
        }
    }
}

/// One evaluator-supplied answer. The variant must match the kind of the
/// metric it answers; `Unanswered` clears a previous answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Numeric(f64),
    Text(String),
    Boolean(bool),
    Unanswered,
}

impl MetricValue {
    /// Split into the storage columns (numeric, text, boolean).
    pub fn into_columns(self) -> (Option<f64>, Option<String>, Option<bool>) {
        match self {
            MetricValue::Numeric(v) => (Some(v), None, None),
            MetricValue::Text(v) => (None, Some(v), None),
            MetricValue::Boolean(v) => (None, None, Some(v)),
            MetricValue::Unanswered => (None, None, None),
        }
    }
}

// DTOs for creating new records

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMetricType {
    pub code: String,
    pub name: String,
    pub kind: MetricKind,
    pub unit: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub weight: f64,
    pub is_required: bool,
    pub applicable_position_types: Vec<String>,
}

/// Full replacement for an existing metric type; the record is swapped in a
/// single UPDATE so concurrent readers never observe a half-applied edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMetricType {
    pub code: String,
    pub name: String,
    pub kind: MetricKind,
    pub unit: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub weight: f64,
    pub is_required: bool,
    pub is_active: bool,
    pub applicable_position_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEvaluation {
    pub personnel_id: i64,
    pub evaluator_id: i64,
    /// Resolved by the host's identity boundary at creation time; stored as
    /// an opaque tag.
    pub position_type: String,
    pub evaluation_date: NaiveDate,
    pub period: EvaluationPeriod,
    pub comments: Option<String>,
}

/// One snapshot metric together with its stored answer, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnsweredMetric {
    pub metric: EvaluationMetric,
    pub value: Option<MetricValueRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationDetail {
    pub evaluation: Evaluation,
    pub metrics: Vec<AnsweredMetric>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_metric(kind: MetricKind) -> EvaluationMetric {
        EvaluationMetric {
            evaluation_id: 1,
            metric_type_id: 1,
            code: "PROD".to_string(),
            name: "Productivity".to_string(),
            kind,
            unit: None,
            min_value: None,
            max_value: None,
            weight: 50.0,
            is_required: true,
            display_order: 0,
        }
    }

    fn value_row(
        numeric: Option<f64>,
        text: Option<&str>,
        boolean: Option<bool>,
    ) -> MetricValueRow {
        MetricValueRow {
            id: 1,
            evaluation_id: 1,
            metric_type_id: 1,
            numeric_value: numeric,
            text_value: text.map(str::to_string),
            boolean_value: boolean,
            comments: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_reconstructs_tagged_value_by_kind() {
        let metric = snapshot_metric(MetricKind::Rating);
        let value = value_row(Some(4.5), None, None).value(&metric).unwrap();
        assert_eq!(value, MetricValue::Numeric(4.5));

        let metric = snapshot_metric(MetricKind::Boolean);
        let value = value_row(None, None, Some(false)).value(&metric).unwrap();
        assert_eq!(value, MetricValue::Boolean(false));

        let metric = snapshot_metric(MetricKind::Text);
        let value = value_row(None, None, None).value(&metric).unwrap();
        assert_eq!(value, MetricValue::Unanswered);
    }

    #[test]
    fn row_with_mismatched_column_is_flagged_as_corruption() {
        let metric = snapshot_metric(MetricKind::Text);
        let err = value_row(Some(3.0), None, None).value(&metric).unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation { .. }));

        // two populated columns can never be valid
        let metric = snapshot_metric(MetricKind::Numeric);
        let err = value_row(Some(3.0), Some("ok"), None)
            .value(&metric)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation { .. }));
    }

    #[test]
    fn metric_value_serializes_untagged() {
        assert_eq!(
            serde_json::to_value(MetricValue::Numeric(4.0)).unwrap(),
            serde_json::json!(4.0)
        );
        assert_eq!(
            serde_json::to_value(MetricValue::Boolean(true)).unwrap(),
            serde_json::json!(true)
        );
        assert_eq!(
            serde_json::from_value::<MetricValue>(serde_json::Value::Null).unwrap(),
            MetricValue::Unanswered
        );
    }

    #[test]
    fn scope_list_decodes_from_json_column() {
        let mut metric_type = MetricType {
            id: 1,
            code: "PROD".to_string(),
            name: "Productivity".to_string(),
            kind: MetricKind::Numeric,
            unit: None,
            min_value: None,
            max_value: None,
            weight: 40.0,
            is_required: true,
            is_active: true,
            display_order: 0,
            position_types: r#"["LOADER","DRIVER"]"#.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(
            metric_type.applicable_position_types(),
            vec!["LOADER".to_string(), "DRIVER".to_string()]
        );

        metric_type.position_types = "[]".to_string();
        assert!(metric_type.applicable_position_types().is_empty());
    }
}
