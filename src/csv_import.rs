//! Bulk catalog seeding from CSV files of metric definitions. Parsing keeps
//! raw field text; a validation pass collects every issue in the file before
//! anything touches the catalog.

use csv::{ReaderBuilder, StringRecord};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

use crate::catalog;
use crate::db::models::{CreateMetricType, MetricKind};
use crate::error::{EngineError, FieldViolation, ValidationError};

#[derive(Error, Debug)]
pub enum CsvImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Encoding error")]
    Encoding,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// One file row, fields kept as written so validation can report the
/// original text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMetricDefinition {
    pub code: String,
    pub name: String,
    pub kind: String,
    pub unit: Option<String>,
    pub min_value: Option<String>,
    pub max_value: Option<String>,
    pub weight: Option<String>,
    pub is_required: Option<String>,
    /// Semicolon-separated in the file.
    pub position_types: Vec<String>,
}

pub struct CatalogCsv;

impl CatalogCsv {
    /// Detect the encoding of a file
    pub fn detect_encoding(file_path: &Path) -> Result<&'static Encoding, CsvImportError> {
        let mut file = File::open(file_path)?;
        let mut buffer = vec![0u8; 8192];
        let bytes_read = file.read(&mut buffer)?;

        let (_encoding, _) = Encoding::for_bom(&buffer[..bytes_read]).unwrap_or((UTF_8, 0));

        // Check if it's valid UTF-8
        if std::str::from_utf8(&buffer[..bytes_read]).is_ok() {
            return Ok(UTF_8);
        }

        // Legacy exports tend to be Windows-1252
        Ok(WINDOWS_1252)
    }

    /// Detect the delimiter used in the CSV file
    pub fn detect_delimiter(content: &str) -> char {
        let first_line = content.lines().next().unwrap_or("");

        let delimiters = [',', '\t', ';', '|'];
        let mut counts: Vec<(char, usize)> = delimiters
            .iter()
            .map(|&d| (d, first_line.matches(d).count()))
            .collect();

        counts.sort_by_key(|&(_, count)| std::cmp::Reverse(count));

        counts.first().map(|&(d, _)| d).unwrap_or(',')
    }

    /// Clean and normalize field values
    pub fn clean_field(field: &str) -> String {
        let trimmed = field.trim().trim_matches('"').trim();

        let mut parts = trimmed.split_whitespace();
        if let Some(first) = parts.next() {
            let mut normalized = String::from(first);
            for part in parts {
                normalized.push(' ');
                normalized.push_str(part);
            }
            normalized
        } else {
            String::new()
        }
    }

    /// Parse a metric-definition CSV file. Requires `code`, `name` and
    /// `kind` columns; `unit`, `min_value`, `max_value`, `weight`,
    /// `required` and `position_types` are optional.
    pub fn parse(file_path: &Path) -> Result<Vec<ParsedMetricDefinition>, CsvImportError> {
        let encoding = Self::detect_encoding(file_path)?;

        let file = File::open(file_path)?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        let (content, _, had_errors) = encoding.decode(&bytes);
        if had_errors {
            return Err(CsvImportError::Encoding);
        }

        Self::parse_content(&content)
    }

    /// Parse already-decoded CSV text; `parse` is the file-reading wrapper.
    pub fn parse_content(content: &str) -> Result<Vec<ParsedMetricDefinition>, CsvImportError> {
        let delimiter = Self::detect_delimiter(content);

        let mut csv_reader = ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers = csv_reader.headers()?.clone();
        for required in ["code", "name", "kind"] {
            if !headers.iter().any(|h| h.eq_ignore_ascii_case(required)) {
                return Err(CsvImportError::InvalidFormat(format!(
                    "Required column not found: {}",
                    required
                )));
            }
        }

        let mut rows = Vec::new();
        for result in csv_reader.records() {
            let record = result?;

            let position_types = Self::get_field_opt(&record, &headers, "position_types")
                .map(|raw| {
                    raw.split(';')
                        .map(Self::clean_field)
                        .filter(|tag| !tag.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            rows.push(ParsedMetricDefinition {
                code: Self::get_field_opt(&record, &headers, "code").unwrap_or_default(),
                name: Self::get_field_opt(&record, &headers, "name").unwrap_or_default(),
                kind: Self::get_field_opt(&record, &headers, "kind").unwrap_or_default(),
                unit: Self::get_field_opt(&record, &headers, "unit"),
                min_value: Self::get_field_opt(&record, &headers, "min_value"),
                max_value: Self::get_field_opt(&record, &headers, "max_value"),
                weight: Self::get_field_opt(&record, &headers, "weight"),
                is_required: Self::get_field_opt(&record, &headers, "required"),
                position_types,
            });
        }

        Ok(rows)
    }

    fn get_field_opt(record: &StringRecord, headers: &StringRecord, name: &str) -> Option<String> {
        let pos = headers.iter().position(|h| h.eq_ignore_ascii_case(name))?;
        let value = record.get(pos)?;
        let cleaned = Self::clean_field(value);
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DuplicateCodeGroup {
    pub code: String,
    pub row_indices: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExistingCodeIssue {
    pub row_index: usize,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnknownKindIssue {
    pub row_index: usize,
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidFieldIssue {
    pub row_index: usize,
    pub field: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DefinitionIssue {
    pub row_index: usize,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportValidationStats {
    pub error_count: usize,
    pub total_issues: usize,
    pub can_import: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportValidationSummary {
    pub stats: ImportValidationStats,
    pub duplicate_codes: Vec<DuplicateCodeGroup>,
    pub existing_codes: Vec<ExistingCodeIssue>,
    pub unknown_kinds: Vec<UnknownKindIssue>,
    pub invalid_fields: Vec<InvalidFieldIssue>,
    pub definition_issues: Vec<DefinitionIssue>,
}

fn parse_kind(raw: &str) -> Option<MetricKind> {
    [
        MetricKind::Numeric,
        MetricKind::Rating,
        MetricKind::Percentage,
        MetricKind::Boolean,
        MetricKind::Text,
    ]
    .into_iter()
    .find(|kind| raw.eq_ignore_ascii_case(kind.as_str()))
}

fn parse_number(raw: &Option<String>) -> Result<Option<f64>, ()> {
    match raw {
        None => Ok(None),
        Some(text) => text.trim().parse::<f64>().map(Some).map_err(|_| ()),
    }
}

fn parse_flag(raw: &Option<String>) -> Result<bool, ()> {
    match raw.as_deref() {
        None => Ok(false),
        Some(text) => match text.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            _ => Err(()),
        },
    }
}

/// Convert one validated row into a catalog definition. Only called for
/// rows the validation pass accepted.
fn definition_from_row(row: &ParsedMetricDefinition) -> Option<CreateMetricType> {
    Some(CreateMetricType {
        code: row.code.clone(),
        name: row.name.clone(),
        kind: parse_kind(&row.kind)?,
        unit: row.unit.clone(),
        min_value: parse_number(&row.min_value).ok()?,
        max_value: parse_number(&row.max_value).ok()?,
        weight: parse_number(&row.weight).ok()?.unwrap_or(0.0),
        is_required: parse_flag(&row.is_required).ok()?,
        applicable_position_types: row.position_types.clone(),
    })
}

/// Check a parsed file against itself and against the codes already in the
/// catalog. Collects every issue so the whole file can be fixed in one
/// round trip; `can_import` guarantees `import_metric_definitions` will
/// accept the rows as-is.
pub fn validate_metric_definitions(
    rows: &[ParsedMetricDefinition],
    existing_codes: &[String],
) -> ImportValidationSummary {
    let mut duplicate_codes: Vec<DuplicateCodeGroup> = Vec::new();
    let mut existing: Vec<ExistingCodeIssue> = Vec::new();
    let mut unknown_kinds: Vec<UnknownKindIssue> = Vec::new();
    let mut invalid_fields: Vec<InvalidFieldIssue> = Vec::new();
    let mut definition_issues: Vec<DefinitionIssue> = Vec::new();

    let existing_lookup: std::collections::HashSet<String> = existing_codes
        .iter()
        .map(|code| code.trim().to_lowercase())
        .collect();

    let mut code_rows: std::collections::HashMap<String, Vec<usize>> =
        std::collections::HashMap::new();

    for (idx, row) in rows.iter().enumerate() {
        let code_key = row.code.trim().to_lowercase();
        if !code_key.is_empty() {
            if existing_lookup.contains(&code_key) {
                existing.push(ExistingCodeIssue {
                    row_index: idx,
                    code: row.code.clone(),
                });
            }
            code_rows.entry(code_key).or_default().push(idx);
        }

        let kind = parse_kind(&row.kind);
        if kind.is_none() {
            unknown_kinds.push(UnknownKindIssue {
                row_index: idx,
                kind: row.kind.clone(),
            });
        }

        for (field, raw) in [
            ("min_value", &row.min_value),
            ("max_value", &row.max_value),
            ("weight", &row.weight),
        ] {
            if parse_number(raw).is_err() {
                invalid_fields.push(InvalidFieldIssue {
                    row_index: idx,
                    field: field.to_string(),
                    value: raw.clone().unwrap_or_default(),
                });
            }
        }
        if parse_flag(&row.is_required).is_err() {
            invalid_fields.push(InvalidFieldIssue {
                row_index: idx,
                field: "required".to_string(),
                value: row.is_required.clone().unwrap_or_default(),
            });
        }

        // once the row parses, run the catalog's own field rules on it
        if let Some(kind) = kind {
            if let (Ok(min), Ok(max), Ok(weight)) = (
                parse_number(&row.min_value),
                parse_number(&row.max_value),
                parse_number(&row.weight),
            ) {
                for violation in catalog::validate_definition(
                    &row.code,
                    &row.name,
                    kind,
                    min,
                    max,
                    weight.unwrap_or(0.0),
                ) {
                    definition_issues.push(DefinitionIssue {
                        row_index: idx,
                        field: violation.field,
                        message: violation.message,
                    });
                }
            }
        }
    }

    for (key, indices) in code_rows {
        if indices.len() > 1 {
            duplicate_codes.push(DuplicateCodeGroup {
                code: key,
                row_indices: indices,
            });
        }
    }
    duplicate_codes.sort_by(|a, b| a.code.cmp(&b.code));

    let error_count = duplicate_codes.len()
        + existing.len()
        + unknown_kinds.len()
        + invalid_fields.len()
        + definition_issues.len();

    ImportValidationSummary {
        stats: ImportValidationStats {
            error_count,
            total_issues: error_count,
            can_import: error_count == 0,
        },
        duplicate_codes,
        existing_codes: existing,
        unknown_kinds,
        invalid_fields,
        definition_issues,
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportResult {
    pub metric_type_count: usize,
}

/// Validate the parsed file against the live catalog and create every
/// definition through the catalog's own create path. Nothing is written
/// when the file has any issue.
pub async fn import_metric_definitions(
    pool: &SqlitePool,
    rows: &[ParsedMetricDefinition],
) -> Result<ImportResult, EngineError> {
    let existing_codes: Vec<String> = sqlx::query_scalar("SELECT code FROM metric_types")
        .fetch_all(pool)
        .await?;

    let summary = validate_metric_definitions(rows, &existing_codes);
    if !summary.stats.can_import {
        let mut violations = Vec::new();
        for group in &summary.duplicate_codes {
            violations.push(FieldViolation::new(
                "code",
                format!("'{}' appears more than once in the file", group.code),
            ));
        }
        for issue in &summary.existing_codes {
            violations.push(FieldViolation::new(
                "code",
                format!("row {}: '{}' already exists in the catalog", issue.row_index + 1, issue.code),
            ));
        }
        for issue in &summary.unknown_kinds {
            violations.push(FieldViolation::new(
                "kind",
                format!("row {}: unknown kind '{}'", issue.row_index + 1, issue.kind),
            ));
        }
        for issue in &summary.invalid_fields {
            violations.push(FieldViolation::new(
                &issue.field,
                format!("row {}: cannot parse '{}'", issue.row_index + 1, issue.value),
            ));
        }
        for issue in &summary.definition_issues {
            violations.push(FieldViolation::new(
                &issue.field,
                format!("row {}: {}", issue.row_index + 1, issue.message),
            ));
        }
        return Err(ValidationError::new(violations).into());
    }

    let mut created = 0;
    for row in rows {
        let Some(definition) = definition_from_row(row) else {
            continue;
        };
        catalog::create_metric_type(pool, definition).await?;
        created += 1;
    }

    Ok(ImportResult {
        metric_type_count: created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn detect_delimiter_prefers_the_most_frequent_candidate() {
        assert_eq!(CatalogCsv::detect_delimiter("a,b,c"), ',');
        assert_eq!(CatalogCsv::detect_delimiter("a\tb\tc"), '\t');
        assert_eq!(CatalogCsv::detect_delimiter("a|b|c"), '|');
    }

    #[test]
    fn clean_field_normalizes_whitespace() {
        assert_eq!(CatalogCsv::clean_field("  Daily   output  "), "Daily output");
        assert_eq!(CatalogCsv::clean_field("\tSAFE"), "SAFE");
    }

    #[test]
    fn parse_content_reads_definitions() {
        let content = "code,name,kind,unit,min_value,max_value,weight,required,position_types\n\
                       PROD,Daily output,NUMERIC,units,0,100,40,true,LOADER;DRIVER\n\
                       SAFE,Safety rating,rating,,,,60,yes,\n";

        let rows = CatalogCsv::parse_content(content).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].code, "PROD");
        assert_eq!(rows[0].unit.as_deref(), Some("units"));
        assert_eq!(rows[0].position_types, vec!["LOADER", "DRIVER"]);

        assert_eq!(rows[1].kind, "rating");
        assert!(rows[1].min_value.is_none());
        assert!(rows[1].position_types.is_empty());
    }

    #[test]
    fn parse_reads_the_sample_definition_file() {
        let rows = CatalogCsv::parse(Path::new("docs/sample_metric_types.csv"))
            .expect("Failed to parse sample file");

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].code, "PROD");
        assert_eq!(rows[3].position_types, vec!["LOADER"]);
        assert!(rows.iter().all(|r| !r.kind.is_empty()));

        let summary = validate_metric_definitions(&rows, &[]);
        assert!(summary.stats.can_import);
    }

    #[test]
    fn parse_content_requires_the_core_columns() {
        let err = CatalogCsv::parse_content("code,name\nPROD,Output\n").unwrap_err();
        assert!(matches!(err, CsvImportError::InvalidFormat(_)));
    }

    fn row(code: &str, kind: &str, weight: Option<&str>) -> ParsedMetricDefinition {
        ParsedMetricDefinition {
            code: code.to_string(),
            name: format!("{} metric", code),
            kind: kind.to_string(),
            unit: None,
            min_value: None,
            max_value: None,
            weight: weight.map(str::to_string),
            is_required: None,
            position_types: Vec::new(),
        }
    }

    #[test]
    fn validation_collects_every_issue_in_one_pass() {
        let rows = vec![
            row("PROD", "NUMERIC", Some("40")),
            row("prod", "RATING", Some("60")),
            row("SAFE", "GAUGE", Some("60")),
            row("ATT", "PERCENTAGE", Some("abc")),
            row("OLD", "RATING", Some("500")),
        ];

        let summary =
            validate_metric_definitions(&rows, &["OLD".to_string(), "KEPT".to_string()]);

        assert!(!summary.stats.can_import);
        assert_eq!(summary.duplicate_codes.len(), 1);
        assert_eq!(summary.duplicate_codes[0].row_indices, vec![0, 1]);
        assert_eq!(summary.existing_codes.len(), 1);
        assert_eq!(summary.unknown_kinds.len(), 1);
        assert_eq!(summary.unknown_kinds[0].kind, "GAUGE");
        assert_eq!(summary.invalid_fields.len(), 1);
        assert_eq!(summary.invalid_fields[0].field, "weight");
        // weight 500 violates the catalog's own range rule
        assert!(summary
            .definition_issues
            .iter()
            .any(|issue| issue.row_index == 4 && issue.field == "weight"));
    }

    #[test]
    fn clean_file_passes_validation() {
        let rows = vec![
            row("PROD", "NUMERIC", Some("40")),
            row("SAFE", "RATING", Some("60")),
        ];
        let summary = validate_metric_definitions(&rows, &[]);
        assert!(summary.stats.can_import);
        assert_eq!(summary.stats.error_count, 0);
    }

    #[tokio::test]
    async fn import_creates_catalog_entries_through_the_create_path() {
        let db = Database::in_memory().await.unwrap();

        let content = "code,name,kind,min_value,max_value,weight,required,position_types\n\
                       PROD,Daily output,NUMERIC,0,100,40,true,LOADER\n\
                       SAFE,Safety rating,RATING,,,60,true,\n";
        let rows = CatalogCsv::parse_content(content).unwrap();

        let result = import_metric_definitions(&db.pool, &rows).await.unwrap();
        assert_eq!(result.metric_type_count, 2);

        let for_loader = catalog::list_for_position_type(&db.pool, "LOADER").await.unwrap();
        assert_eq!(for_loader.len(), 2);
        assert!(for_loader.iter().all(|m| m.is_required));

        let for_driver = catalog::list_for_position_type(&db.pool, "DRIVER").await.unwrap();
        let codes: Vec<&str> = for_driver.iter().map(|m| m.code.as_str()).collect();
        assert_eq!(codes, vec!["SAFE"]);
    }

    #[tokio::test]
    async fn import_refuses_files_with_issues_and_writes_nothing() {
        let db = Database::in_memory().await.unwrap();

        let rows = vec![
            row("PROD", "NUMERIC", Some("40")),
            row("PROD", "RATING", Some("60")),
        ];

        let err = import_metric_definitions(&db.pool, &rows).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let remaining = catalog::list_metric_types(&db.pool).await.unwrap();
        assert!(remaining.is_empty());
    }
}
