//! Metric-type catalog: the administrator-managed vocabulary of measurable
//! attributes. Read-mostly; every edit replaces the record in one statement.

use sqlx::SqlitePool;

use crate::db::models::{CreateMetricType, MetricKind, MetricType, UpdateMetricType};
use crate::error::{EngineError, FieldViolation, ValidationError};

/// Field-level rules shared by create and update. Returns every violation so
/// a host can render per-input feedback in one round trip.
pub(crate) fn validate_definition(
    code: &str,
    name: &str,
    kind: MetricKind,
    min_value: Option<f64>,
    max_value: Option<f64>,
    weight: f64,
) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    if code.trim().is_empty() {
        violations.push(FieldViolation::new("code", "must not be empty"));
    }
    if name.trim().is_empty() {
        violations.push(FieldViolation::new("name", "must not be empty"));
    }
    if !(0.0..=100.0).contains(&weight) || !weight.is_finite() {
        violations.push(FieldViolation::new("weight", "must be between 0 and 100"));
    }
    if let (Some(min), Some(max)) = (min_value, max_value) {
        if min >= max {
            violations.push(FieldViolation::new(
                "min_value",
                "must be strictly less than max_value",
            ));
        }
    }
    if !matches!(kind, MetricKind::Numeric | MetricKind::Percentage)
        && (min_value.is_some() || max_value.is_some())
    {
        violations.push(FieldViolation::new(
            "min_value",
            format!("bounds are not meaningful for kind {}", kind),
        ));
    }

    violations
}

/// Normalized JSON form of the scope list: tags trimmed, blanks dropped,
/// duplicates removed, insertion order kept.
fn encode_scope(tags: &[String]) -> String {
    let mut cleaned: Vec<String> = Vec::new();
    for tag in tags {
        let trimmed = tag.trim();
        if !trimmed.is_empty() && !cleaned.iter().any(|t| t == trimmed) {
            cleaned.push(trimmed.to_string());
        }
    }
    serde_json::Value::from(cleaned).to_string()
}

async fn code_in_use(
    pool: &SqlitePool,
    code: &str,
    exclude_id: Option<i64>,
) -> Result<bool, EngineError> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM metric_types WHERE code = ?")
        .bind(code)
        .fetch_optional(pool)
        .await?;

    Ok(match (existing, exclude_id) {
        (Some(found), Some(id)) => found != id,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

pub async fn create_metric_type(
    pool: &SqlitePool,
    def: CreateMetricType,
) -> Result<MetricType, EngineError> {
    let code = def.code.trim().to_string();
    let mut violations = validate_definition(
        &code,
        &def.name,
        def.kind,
        def.min_value,
        def.max_value,
        def.weight,
    );

    if !code.is_empty() && code_in_use(pool, &code, None).await? {
        violations.push(FieldViolation::new("code", "is already in use"));
    }

    if !violations.is_empty() {
        return Err(ValidationError::new(violations).into());
    }

    // new metrics sort after everything already in the catalog
    let next_order: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(display_order) + 1, 0) FROM metric_types")
            .fetch_one(pool)
            .await?;

    let metric_type = sqlx::query_as::<_, MetricType>(
        r#"
        INSERT INTO metric_types
            (code, name, kind, unit, min_value, max_value, weight,
             is_required, is_active, display_order, position_types,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, datetime('now'), datetime('now'))
        RETURNING *
        "#,
    )
    .bind(&code)
    .bind(def.name.trim())
    .bind(def.kind)
    .bind(&def.unit)
    .bind(def.min_value)
    .bind(def.max_value)
    .bind(def.weight)
    .bind(def.is_required)
    .bind(next_order)
    .bind(encode_scope(&def.applicable_position_types))
    .fetch_one(pool)
    .await?;

    Ok(metric_type)
}

pub async fn update_metric_type(
    pool: &SqlitePool,
    id: i64,
    def: UpdateMetricType,
) -> Result<MetricType, EngineError> {
    let existing = get_metric_type(pool, id).await?;

    let code = def.code.trim().to_string();
    let violations = validate_definition(
        &code,
        &def.name,
        def.kind,
        def.min_value,
        def.max_value,
        def.weight,
    );
    if !violations.is_empty() {
        return Err(ValidationError::new(violations).into());
    }

    if code != existing.code {
        // the code becomes part of historical evaluations once any value
        // references this metric; after that it cannot be renamed
        let referenced: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM metric_values WHERE metric_type_id = ?")
                .bind(id)
                .fetch_one(pool)
                .await?;
        if referenced > 0 {
            return Err(EngineError::Conflict {
                code: existing.code,
            });
        }
        if code_in_use(pool, &code, Some(id)).await? {
            return Err(EngineError::Conflict { code });
        }
    }

    let metric_type = sqlx::query_as::<_, MetricType>(
        r#"
        UPDATE metric_types
        SET code = ?, name = ?, kind = ?, unit = ?, min_value = ?, max_value = ?,
            weight = ?, is_required = ?, is_active = ?, position_types = ?,
            updated_at = datetime('now')
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(&code)
    .bind(def.name.trim())
    .bind(def.kind)
    .bind(&def.unit)
    .bind(def.min_value)
    .bind(def.max_value)
    .bind(def.weight)
    .bind(def.is_required)
    .bind(def.is_active)
    .bind(encode_scope(&def.applicable_position_types))
    .bind(id)
    .fetch_one(pool)
    .await?;

    Ok(metric_type)
}

/// Soft-disable: the metric disappears from new evaluations but stays on
/// historical ones through their snapshots.
pub async fn deactivate_metric_type(
    pool: &SqlitePool,
    id: i64,
) -> Result<MetricType, EngineError> {
    sqlx::query_as::<_, MetricType>(
        "UPDATE metric_types
         SET is_active = 0, updated_at = datetime('now')
         WHERE id = ?
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(EngineError::not_found("metric type", id))
}

pub async fn get_metric_type(pool: &SqlitePool, id: i64) -> Result<MetricType, EngineError> {
    sqlx::query_as::<_, MetricType>("SELECT * FROM metric_types WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(EngineError::not_found("metric type", id))
}

/// Full catalog, inactive entries included, in display order.
pub async fn list_metric_types(pool: &SqlitePool) -> Result<Vec<MetricType>, EngineError> {
    let metric_types = sqlx::query_as::<_, MetricType>(
        "SELECT * FROM metric_types ORDER BY display_order, id",
    )
    .fetch_all(pool)
    .await?;

    Ok(metric_types)
}

/// Active metrics applicable to one position type: an empty scope applies
/// everywhere, otherwise the tag must appear in the scope list. Ordered by
/// display_order with id as the tie-break.
pub async fn list_for_position_type(
    pool: &SqlitePool,
    position_type: &str,
) -> Result<Vec<MetricType>, EngineError> {
    let metric_types = sqlx::query_as::<_, MetricType>(
        r#"
        SELECT * FROM metric_types
        WHERE is_active = 1
          AND (json_array_length(position_types) = 0
               OR EXISTS (SELECT 1 FROM json_each(metric_types.position_types)
                          WHERE json_each.value = ?))
        ORDER BY display_order, id
        "#,
    )
    .bind(position_type)
    .fetch_all(pool)
    .await?;

    Ok(metric_types)
}

/// Assign display_order = position in `ordered_ids` to each metric, in one
/// transaction. Any unknown id aborts the whole reorder.
pub async fn reorder_metric_types(
    pool: &SqlitePool,
    ordered_ids: &[i64],
) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;

    for (index, id) in ordered_ids.iter().enumerate() {
        let result = sqlx::query(
            "UPDATE metric_types
             SET display_order = ?, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(index as i64)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::not_found("metric type", *id));
        }
    }

    tx.commit().await?;
    Ok(())
}
