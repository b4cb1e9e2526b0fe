//! Read-only aggregates over submitted evaluations: per-subject performance
//! profiles and catalog-wide score statistics.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::db::models::MetricKind;
use crate::error::EngineError;
use crate::scoring;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricAverage {
    pub metric_type_id: i64,
    pub code: String,
    pub name: String,
    /// Mean of the answers on the common 0-5 scale.
    pub average_normalized: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonnelPerformance {
    pub personnel_id: i64,
    pub evaluation_count: i64,
    pub average_overall_score: Option<f64>,
    pub metric_averages: Vec<MetricAverage>,
    pub strengths: Vec<String>,
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBand {
    pub range: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationStats {
    pub total_evaluations: i64,
    pub submitted_evaluations: i64,
    pub draft_evaluations: i64,
    pub average_overall_score: Option<f64>,
    pub score_distribution: Vec<ScoreBand>,
}

/// Profile of one subject across every SUBMITTED evaluation: mean overall
/// score, per-metric means on the 0-5 scale, and the three best and worst
/// metrics as strengths and gaps. Drafts are invisible here.
pub async fn compute_personnel_performance(
    pool: &SqlitePool,
    personnel_id: i64,
) -> Result<PersonnelPerformance, EngineError> {
    let (evaluation_count, average_overall_score): (i64, Option<f64>) = sqlx::query_as(
        "SELECT COUNT(*), AVG(overall_score) FROM evaluations
         WHERE personnel_id = ? AND status = 'SUBMITTED'",
    )
    .bind(personnel_id)
    .fetch_one(pool)
    .await?;

    let answer_rows: Vec<(i64, String, String, MetricKind, Option<f64>, Option<f64>, f64, i64)> =
        sqlx::query_as(
            "SELECT
                em.metric_type_id, em.code, em.name, em.kind,
                em.min_value, em.max_value, mv.numeric_value, em.display_order
            FROM evaluations e
            JOIN evaluation_metrics em ON em.evaluation_id = e.id
            JOIN metric_values mv
                ON mv.evaluation_id = e.id AND mv.metric_type_id = em.metric_type_id
            WHERE e.personnel_id = ? AND e.status = 'SUBMITTED'
              AND mv.numeric_value IS NOT NULL
            ORDER BY em.display_order, em.metric_type_id",
        )
        .bind(personnel_id)
        .fetch_all(pool)
        .await?;

    // accumulate per metric, preserving display order of first appearance
    let mut order: Vec<i64> = Vec::new();
    let mut sums: HashMap<i64, (String, String, f64, i64)> = HashMap::new();
    for (metric_type_id, code, name, kind, min_value, max_value, value, _) in answer_rows {
        let normalized = scoring::normalize(kind, min_value, max_value, value);
        let entry = sums
            .entry(metric_type_id)
            .or_insert_with(|| {
                order.push(metric_type_id);
                (code, name, 0.0, 0)
            });
        entry.2 += normalized;
        entry.3 += 1;
    }

    let metric_averages: Vec<MetricAverage> = order
        .iter()
        .map(|id| {
            let (code, name, total, count) = sums[id].clone();
            MetricAverage {
                metric_type_id: *id,
                code,
                name,
                average_normalized: total / count as f64,
                sample_count: count,
            }
        })
        .collect();

    let mut ranked = metric_averages.clone();
    ranked.sort_by(|a, b| {
        b.average_normalized
            .partial_cmp(&a.average_normalized)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let strengths: Vec<String> = ranked.iter().take(3).map(|m| m.name.clone()).collect();
    let gaps: Vec<String> = ranked.iter().rev().take(3).map(|m| m.name.clone()).collect();

    Ok(PersonnelPerformance {
        personnel_id,
        evaluation_count,
        average_overall_score,
        metric_averages,
        strengths,
        gaps,
    })
}

/// Catalog-wide totals and the banded distribution of frozen overall
/// scores across submitted evaluations.
pub async fn compute_evaluation_stats(pool: &SqlitePool) -> Result<EvaluationStats, EngineError> {
    let total_evaluations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evaluations")
        .fetch_one(pool)
        .await?;

    let submitted_evaluations: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM evaluations WHERE status = 'SUBMITTED'")
            .fetch_one(pool)
            .await?;

    let average_overall_score: Option<f64> = sqlx::query_scalar(
        "SELECT AVG(overall_score) FROM evaluations
         WHERE status = 'SUBMITTED' AND overall_score IS NOT NULL",
    )
    .fetch_one(pool)
    .await?;

    let distribution_rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT
            CASE
                WHEN overall_score < 1 THEN 0
                WHEN overall_score < 2 THEN 1
                WHEN overall_score < 3 THEN 2
                WHEN overall_score < 4 THEN 3
                ELSE 4
            END as band_key,
            COUNT(*) as count
        FROM evaluations
        WHERE status = 'SUBMITTED' AND overall_score IS NOT NULL
        GROUP BY band_key
        ORDER BY band_key",
    )
    .fetch_all(pool)
    .await?;

    let score_distribution: Vec<ScoreBand> = distribution_rows
        .into_iter()
        .map(|(band_key, count)| {
            let range = match band_key {
                0 => "0-1",
                1 => "1-2",
                2 => "2-3",
                3 => "3-4",
                _ => "4+",
            };
            ScoreBand {
                range: range.to_string(),
                count,
            }
        })
        .collect();

    Ok(EvaluationStats {
        total_evaluations,
        submitted_evaluations,
        draft_evaluations: total_evaluations - submitted_evaluations,
        average_overall_score,
        score_distribution,
    })
}
