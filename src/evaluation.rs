//! Evaluation lifecycle: drafts accumulate answers against the
//! applicable-set snapshot captured at creation, then freeze on submission.

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::catalog;
use crate::db::models::{
    AnsweredMetric, CreateEvaluation, Evaluation, EvaluationDetail, EvaluationMetric,
    EvaluationStatus, MetricValue, MetricValueRow,
};
use crate::error::{EngineError, MissingMetric};
use crate::scoring;
use crate::validation;

async fn fetch_evaluation(pool: &SqlitePool, id: i64) -> Result<Evaluation, EngineError> {
    sqlx::query_as::<_, Evaluation>("SELECT * FROM evaluations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(EngineError::not_found("evaluation", id))
}

fn require_draft(evaluation: &Evaluation) -> Result<(), EngineError> {
    if evaluation.status != EvaluationStatus::Draft {
        return Err(EngineError::InvalidState {
            id: evaluation.id,
            actual: evaluation.status,
            expected: EvaluationStatus::Draft,
        });
    }
    Ok(())
}

async fn fetch_snapshot(
    pool: &SqlitePool,
    evaluation_id: i64,
) -> Result<Vec<EvaluationMetric>, EngineError> {
    let metrics = sqlx::query_as::<_, EvaluationMetric>(
        "SELECT * FROM evaluation_metrics
         WHERE evaluation_id = ?
         ORDER BY display_order, metric_type_id",
    )
    .bind(evaluation_id)
    .fetch_all(pool)
    .await?;

    Ok(metrics)
}

async fn fetch_values(
    pool: &SqlitePool,
    evaluation_id: i64,
) -> Result<Vec<MetricValueRow>, EngineError> {
    let values = sqlx::query_as::<_, MetricValueRow>(
        "SELECT * FROM metric_values WHERE evaluation_id = ?",
    )
    .bind(evaluation_id)
    .fetch_all(pool)
    .await?;

    Ok(values)
}

/// Decode stored rows into tagged values keyed by metric type. A row that
/// references a metric outside the snapshot is corruption: applicability is
/// enforced on every write.
fn answers_from_rows(
    metrics: &[EvaluationMetric],
    rows: &[MetricValueRow],
) -> Result<HashMap<i64, MetricValue>, EngineError> {
    let mut answers = HashMap::new();
    for row in rows {
        let metric = metrics
            .iter()
            .find(|m| m.metric_type_id == row.metric_type_id)
            .ok_or_else(|| EngineError::InvariantViolation {
                detail: format!(
                    "value row {} references metric type {} outside the snapshot of evaluation {}",
                    row.id, row.metric_type_id, row.evaluation_id
                ),
            })?;
        answers.insert(row.metric_type_id, row.value(metric)?);
    }
    Ok(answers)
}

/// Create a DRAFT evaluation and capture the applicable metric set for the
/// subject's position type as it stands right now. Later catalog edits do
/// not reach this evaluation.
pub async fn create_evaluation(
    pool: &SqlitePool,
    request: CreateEvaluation,
) -> Result<Evaluation, EngineError> {
    let applicable = catalog::list_for_position_type(pool, &request.position_type).await?;

    let mut tx = pool.begin().await?;

    let evaluation = sqlx::query_as::<_, Evaluation>(
        r#"
        INSERT INTO evaluations
            (personnel_id, evaluator_id, position_type, evaluation_date,
             period, comments, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'DRAFT', datetime('now'), datetime('now'))
        RETURNING *
        "#,
    )
    .bind(request.personnel_id)
    .bind(request.evaluator_id)
    .bind(&request.position_type)
    .bind(request.evaluation_date)
    .bind(request.period)
    .bind(&request.comments)
    .fetch_one(&mut *tx)
    .await?;

    for metric_type in &applicable {
        sqlx::query(
            r#"
            INSERT INTO evaluation_metrics
                (evaluation_id, metric_type_id, code, name, kind, unit,
                 min_value, max_value, weight, is_required, display_order)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(evaluation.id)
        .bind(metric_type.id)
        .bind(&metric_type.code)
        .bind(&metric_type.name)
        .bind(metric_type.kind)
        .bind(&metric_type.unit)
        .bind(metric_type.min_value)
        .bind(metric_type.max_value)
        .bind(metric_type.weight)
        .bind(metric_type.is_required)
        .bind(metric_type.display_order)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(evaluation)
}

/// Record or replace one answer on a DRAFT evaluation and refresh its
/// running overall score. `MetricValue::Unanswered` clears a previous
/// answer while keeping the comment, if any.
pub async fn upsert_metric_value(
    pool: &SqlitePool,
    evaluation_id: i64,
    metric_type_id: i64,
    value: MetricValue,
    comments: Option<String>,
) -> Result<Evaluation, EngineError> {
    let evaluation = fetch_evaluation(pool, evaluation_id).await?;
    require_draft(&evaluation)?;

    let snapshot = fetch_snapshot(pool, evaluation_id).await?;
    let metric = snapshot
        .iter()
        .find(|m| m.metric_type_id == metric_type_id)
        .ok_or(EngineError::NotApplicable {
            evaluation_id,
            metric_type_id,
        })?;

    validation::validate_value(metric, &value)?;

    let (numeric_value, text_value, boolean_value) = value.into_columns();
    sqlx::query(
        r#"
        INSERT INTO metric_values
            (evaluation_id, metric_type_id, numeric_value, text_value,
             boolean_value, comments, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, datetime('now'), datetime('now'))
        ON CONFLICT(evaluation_id, metric_type_id) DO UPDATE
        SET numeric_value = excluded.numeric_value,
            text_value = excluded.text_value,
            boolean_value = excluded.boolean_value,
            comments = excluded.comments,
            updated_at = datetime('now')
        "#,
    )
    .bind(evaluation_id)
    .bind(metric_type_id)
    .bind(numeric_value)
    .bind(text_value)
    .bind(boolean_value)
    .bind(&comments)
    .execute(pool)
    .await?;

    refresh_overall_score(pool, evaluation_id, &snapshot).await
}

async fn refresh_overall_score(
    pool: &SqlitePool,
    evaluation_id: i64,
    snapshot: &[EvaluationMetric],
) -> Result<Evaluation, EngineError> {
    let rows = fetch_values(pool, evaluation_id).await?;
    let answers = answers_from_rows(snapshot, &rows)?;
    let score = scoring::overall_score(snapshot, &answers);

    let evaluation = sqlx::query_as::<_, Evaluation>(
        "UPDATE evaluations
         SET overall_score = ?, updated_at = datetime('now')
         WHERE id = ?
         RETURNING *",
    )
    .bind(score)
    .bind(evaluation_id)
    .fetch_one(pool)
    .await?;

    Ok(evaluation)
}

/// Submit a complete DRAFT: every required metric must be answered. The
/// overall score is computed one final time and frozen; a second submit is
/// an error, never a silent no-op.
pub async fn submit_evaluation(
    pool: &SqlitePool,
    evaluation_id: i64,
) -> Result<Evaluation, EngineError> {
    let evaluation = fetch_evaluation(pool, evaluation_id).await?;
    require_draft(&evaluation)?;

    let snapshot = fetch_snapshot(pool, evaluation_id).await?;
    let rows = fetch_values(pool, evaluation_id).await?;
    let answers = answers_from_rows(&snapshot, &rows)?;

    let missing = scoring::completeness(&snapshot, &answers);
    if !missing.is_empty() {
        return Err(EngineError::Incomplete {
            evaluation_id,
            missing,
        });
    }

    let score = scoring::overall_score(&snapshot, &answers);

    let evaluation = sqlx::query_as::<_, Evaluation>(
        "UPDATE evaluations
         SET status = 'SUBMITTED', overall_score = ?, updated_at = datetime('now')
         WHERE id = ?
         RETURNING *",
    )
    .bind(score)
    .bind(evaluation_id)
    .fetch_one(pool)
    .await?;

    Ok(evaluation)
}

/// Discard a DRAFT with everything it owns. SUBMITTED evaluations are
/// immutable history and cannot be deleted through the engine.
pub async fn delete_evaluation(pool: &SqlitePool, evaluation_id: i64) -> Result<(), EngineError> {
    let evaluation = fetch_evaluation(pool, evaluation_id).await?;
    require_draft(&evaluation)?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM metric_values WHERE evaluation_id = ?")
        .bind(evaluation_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM evaluation_metrics WHERE evaluation_id = ?")
        .bind(evaluation_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM evaluations WHERE id = ?")
        .bind(evaluation_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}

/// The evaluation with its snapshot metrics and any stored answers, in
/// display order.
pub async fn get_evaluation(
    pool: &SqlitePool,
    evaluation_id: i64,
) -> Result<EvaluationDetail, EngineError> {
    let evaluation = fetch_evaluation(pool, evaluation_id).await?;
    let snapshot = fetch_snapshot(pool, evaluation_id).await?;
    let rows = fetch_values(pool, evaluation_id).await?;

    let metrics = snapshot
        .into_iter()
        .map(|metric| {
            let value = rows
                .iter()
                .find(|row| row.metric_type_id == metric.metric_type_id)
                .cloned();
            AnsweredMetric { metric, value }
        })
        .collect();

    Ok(EvaluationDetail {
        evaluation,
        metrics,
    })
}

/// Required metrics still unanswered; empty means ready to submit.
pub async fn get_completeness(
    pool: &SqlitePool,
    evaluation_id: i64,
) -> Result<Vec<MissingMetric>, EngineError> {
    fetch_evaluation(pool, evaluation_id).await?;
    let snapshot = fetch_snapshot(pool, evaluation_id).await?;
    let rows = fetch_values(pool, evaluation_id).await?;
    let answers = answers_from_rows(&snapshot, &rows)?;

    Ok(scoring::completeness(&snapshot, &answers))
}

/// The stored overall score: the running value while DRAFT, the frozen one
/// after submission. `None` until a weighted numeric answer exists.
pub async fn get_overall_score(
    pool: &SqlitePool,
    evaluation_id: i64,
) -> Result<Option<f64>, EngineError> {
    let evaluation = fetch_evaluation(pool, evaluation_id).await?;
    Ok(evaluation.overall_score)
}

pub async fn list_evaluations_for_personnel(
    pool: &SqlitePool,
    personnel_id: i64,
) -> Result<Vec<Evaluation>, EngineError> {
    let evaluations = sqlx::query_as::<_, Evaluation>(
        "SELECT * FROM evaluations
         WHERE personnel_id = ?
         ORDER BY evaluation_date DESC, id DESC",
    )
    .bind(personnel_id)
    .fetch_all(pool)
    .await?;

    Ok(evaluations)
}
