//! Completeness and overall-score aggregation over an evaluation's
//! snapshot metrics and answers. Pure computation; callers load the rows.

use std::collections::HashMap;

use crate::db::models::{EvaluationMetric, MetricKind, MetricValue};
use crate::error::MissingMetric;
use crate::validation::is_answered;

/// Required snapshot metrics that have no answer yet. An empty result means
/// the evaluation is complete and may be submitted.
pub fn completeness(
    metrics: &[EvaluationMetric],
    answers: &HashMap<i64, MetricValue>,
) -> Vec<MissingMetric> {
    metrics
        .iter()
        .filter(|m| m.is_required)
        .filter(|m| {
            answers
                .get(&m.metric_type_id)
                .map(|value| !is_answered(m, value))
                .unwrap_or(true)
        })
        .map(|m| MissingMetric {
            metric_type_id: m.metric_type_id,
            code: m.code.clone(),
            name: m.name.clone(),
        })
        .collect()
}

/// Weighted mean over all answered numeric-bearing metrics, normalized to a
/// 0-5 scale and rounded to one decimal. `None` when no answered metric
/// carries weight: "no score yet" is distinct from a score of 0.
pub fn overall_score(
    metrics: &[EvaluationMetric],
    answers: &HashMap<i64, MetricValue>,
) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for metric in metrics {
        if !metric.kind.is_numeric_bearing() {
            continue;
        }
        let Some(MetricValue::Numeric(value)) = answers.get(&metric.metric_type_id) else {
            continue;
        };

        weighted_sum +=
            normalize(metric.kind, metric.min_value, metric.max_value, *value) * metric.weight;
        weight_total += metric.weight;
    }

    if weight_total == 0.0 {
        None
    } else {
        Some(round_half_up(weighted_sum / weight_total))
    }
}

/// Project a raw answer onto the common 0-5 scale.
///
/// PERCENTAGE divides by 20; NUMERIC rescales through its own min/max pair
/// when both are set, otherwise the raw value is taken as-is and clamped
/// into [0, 5]; RATING is already on the scale.
pub fn normalize(kind: MetricKind, min_value: Option<f64>, max_value: Option<f64>, value: f64) -> f64 {
    match kind {
        MetricKind::Percentage => value / 20.0,
        MetricKind::Rating => value,
        MetricKind::Numeric => match (min_value, max_value) {
            (Some(min), Some(max)) if max > min => (value - min) / (max - min) * 5.0,
            _ => value.clamp(0.0, 5.0),
        },
        MetricKind::Boolean | MetricKind::Text => 0.0,
    }
}

/// Round to one decimal place, half up.
pub fn round_half_up(value: f64) -> f64 {
    (value * 10.0 + 0.5).floor() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(
        id: i64,
        code: &str,
        kind: MetricKind,
        min: Option<f64>,
        max: Option<f64>,
        weight: f64,
        required: bool,
    ) -> EvaluationMetric {
        EvaluationMetric {
            evaluation_id: 1,
            metric_type_id: id,
            code: code.to_string(),
            name: code.to_string(),
            kind,
            unit: None,
            min_value: min,
            max_value: max,
            weight,
            is_required: required,
            display_order: id,
        }
    }

    fn answers(entries: &[(i64, MetricValue)]) -> HashMap<i64, MetricValue> {
        entries.iter().cloned().collect()
    }

    #[test]
    fn weighted_mean_matches_worked_example() {
        // PROD 80 of 0-100 at weight 40 and SAFE rating 4 at weight 60 both
        // normalize to 4.0, so the aggregate lands on 4.0 exactly.
        let metrics = vec![
            metric(1, "PROD", MetricKind::Numeric, Some(0.0), Some(100.0), 40.0, true),
            metric(2, "SAFE", MetricKind::Rating, None, None, 60.0, true),
        ];
        let answers = answers(&[
            (1, MetricValue::Numeric(80.0)),
            (2, MetricValue::Numeric(4.0)),
        ]);

        assert_eq!(overall_score(&metrics, &answers), Some(4.0));
    }

    #[test]
    fn score_is_undefined_until_a_numeric_answer_exists() {
        let metrics = vec![
            metric(1, "NOTE", MetricKind::Text, None, None, 30.0, false),
            metric(2, "CERT", MetricKind::Boolean, None, None, 30.0, false),
            metric(3, "PROD", MetricKind::Numeric, Some(0.0), Some(10.0), 40.0, true),
        ];
        let mut current = answers(&[
            (1, MetricValue::Text("steady".to_string())),
            (2, MetricValue::Boolean(true)),
        ]);

        assert_eq!(overall_score(&metrics, &current), None);

        current.insert(3, MetricValue::Numeric(5.0));
        assert_eq!(overall_score(&metrics, &current), Some(2.5));
    }

    #[test]
    fn all_zero_weights_leave_score_undefined() {
        let metrics = vec![metric(1, "PROD", MetricKind::Rating, None, None, 0.0, true)];
        let current = answers(&[(1, MetricValue::Numeric(4.0))]);

        assert_eq!(overall_score(&metrics, &current), None);
    }

    #[test]
    fn heavier_metrics_dominate_the_aggregate() {
        let metrics = vec![
            metric(1, "SAFE", MetricKind::Rating, None, None, 90.0, true),
            metric(2, "PROD", MetricKind::Rating, None, None, 10.0, true),
        ];
        let current = answers(&[
            (1, MetricValue::Numeric(5.0)),
            (2, MetricValue::Numeric(0.0)),
        ]);

        assert_eq!(overall_score(&metrics, &current), Some(4.5));
    }

    #[test]
    fn unanswered_metrics_are_excluded_not_zeroed() {
        let metrics = vec![
            metric(1, "SAFE", MetricKind::Rating, None, None, 50.0, true),
            metric(2, "PROD", MetricKind::Rating, None, None, 50.0, true),
        ];
        let current = answers(&[(1, MetricValue::Numeric(4.0))]);

        // the running draft score averages only what has been answered
        assert_eq!(overall_score(&metrics, &current), Some(4.0));
    }

    #[test]
    fn percentage_and_unbounded_numeric_normalization() {
        assert_eq!(normalize(MetricKind::Percentage, None, None, 80.0), 4.0);

        // numeric with a bounds pair rescales through it
        assert_eq!(
            normalize(MetricKind::Numeric, Some(10.0), Some(20.0), 15.0),
            2.5
        );

        // without a pair the raw value is clamped onto the scale
        assert_eq!(normalize(MetricKind::Numeric, None, None, 4.2), 4.2);
        assert_eq!(normalize(MetricKind::Numeric, None, None, 7.0), 5.0);
    }

    #[test]
    fn rounding_is_half_up_to_one_decimal() {
        assert_eq!(round_half_up(3.25), 3.3);
        assert_eq!(round_half_up(3.24), 3.2);
        assert_eq!(round_half_up(4.0), 4.0);
    }

    #[test]
    fn completeness_lists_exactly_the_required_unanswered_metrics() {
        let metrics = vec![
            metric(1, "PROD", MetricKind::Numeric, Some(0.0), Some(100.0), 40.0, true),
            metric(2, "SAFE", MetricKind::Rating, None, None, 60.0, true),
            metric(3, "NOTE", MetricKind::Text, None, None, 0.0, false),
            metric(4, "CERT", MetricKind::Boolean, None, None, 0.0, true),
        ];
        let current = answers(&[
            (1, MetricValue::Numeric(80.0)),
            // blank text never counts as an answer
            (3, MetricValue::Text("  ".to_string())),
            // false does count as an answer
            (4, MetricValue::Boolean(false)),
        ]);

        let missing = completeness(&metrics, &current);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].code, "SAFE");
    }
}
