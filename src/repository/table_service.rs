use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "customer_payments",
    "payment_packages",
    "payment_statement_views",
    "payout_periods",
    "trainer_membership_settings",
];

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    query.push(" ORDER BY t.").push(order_name);
    if ascending {
        query.push(" ASC NULLS LAST");
    } else {
        query.push(" DESC NULLS LAST");
    }
    query.push(" LIMIT ").push_bind(limit.clamp(1, 1000));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn find_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Option<Value>, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_eq_filter(
        &mut query,
        id_name,
        &infer_scalar_filter(id_name, &Value::String(row_id.to_string())),
    );
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    Ok(row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten()))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }

    let keys = sorted_keys(payload.keys())?;

    // jsonb_populate_record lets PostgreSQL resolve column types (uuid, date,
    // timestamptz, bigint) from the table definition.
    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    push_insert_columns(&mut query, table_name, &keys);
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

/// Inserts every payload in a single statement, so the batch either lands
/// whole or not at all. All payloads must share the first payload's keys.
pub async fn create_rows(
    pool: &sqlx::PgPool,
    table: &str,
    payloads: &[Map<String, Value>],
) -> Result<u64, AppError> {
    let table_name = validate_table(table)?;
    let Some(first) = payloads.first() else {
        return Ok(0);
    };

    let keys = sorted_keys(first.keys())?;
    if payloads
        .iter()
        .any(|payload| payload.len() != keys.len() || keys.iter().any(|key| !payload.contains_key(key)))
    {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} records: inconsistent columns."
        )));
    }

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    push_insert_columns(&mut query, table_name, &keys);
    query
        .push(" FROM jsonb_populate_recordset(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Array(
        payloads.iter().cloned().map(Value::Object).collect(),
    ));
    query.push(") r");

    let result = query.build().execute(pool).await.map_err(map_db_error)?;
    Ok(result.rows_affected())
}

fn sorted_keys<'a>(keys: impl Iterator<Item = &'a String>) -> Result<Vec<String>, AppError> {
    let mut keys = keys.cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }
    Ok(keys)
}

fn push_insert_columns(query: &mut QueryBuilder<Postgres>, table_name: &str, keys: &[String]) {
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in keys {
            separated.push(key.as_str());
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in keys {
            separated.push("r.");
            separated.push_unseparated(key.as_str());
        }
    }
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    if !trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    }) || trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit())
    {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

#[derive(Debug, Clone, PartialEq)]
enum ScalarFilter {
    Text(String),
    Uuid(uuid::Uuid),
    Bool(bool),
    I64(i64),
    Date(NaiveDate),
    Timestamp(DateTime<FixedOffset>),
}

fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    column: &str,
    value: &Value,
) -> Result<(), AppError> {
    let column = validate_identifier(column)?;
    match value {
        Value::Null => Ok(()),
        Value::Array(_) | Value::Object(_) => Err(AppError::BadRequest(format!(
            "Filter '{column}' only supports scalar values."
        ))),
        _ => {
            query.push(" AND ");
            push_eq_filter(query, column, &infer_scalar_filter(column, value));
            Ok(())
        }
    }
}

fn push_eq_filter(query: &mut QueryBuilder<Postgres>, column: &str, value: &ScalarFilter) {
    query.push("t.").push(column);
    match value {
        ScalarFilter::Text(text) => {
            query.push("::text = ").push_bind(text.clone());
        }
        ScalarFilter::Uuid(id) => {
            query.push(" = ").push_bind(*id);
        }
        ScalarFilter::Bool(flag) => {
            query.push(" = ").push_bind(*flag);
        }
        ScalarFilter::I64(number) => {
            query.push(" = ").push_bind(*number);
        }
        ScalarFilter::Date(date) => {
            query.push(" = ").push_bind(*date);
        }
        ScalarFilter::Timestamp(timestamp) => {
            query.push(" = ").push_bind(*timestamp);
        }
    }
}

fn infer_scalar_filter(column: &str, value: &Value) -> ScalarFilter {
    match value {
        Value::Bool(flag) => ScalarFilter::Bool(*flag),
        Value::Number(number) => number
            .as_i64()
            .map(ScalarFilter::I64)
            .unwrap_or_else(|| ScalarFilter::Text(number.to_string())),
        Value::String(text) => {
            let trimmed = text.trim();
            if is_uuid_identifier(column) {
                if let Ok(parsed) = uuid::Uuid::parse_str(trimmed) {
                    return ScalarFilter::Uuid(parsed);
                }
            }
            if is_timestamp_identifier(column) {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                    return ScalarFilter::Timestamp(parsed);
                }
            }
            if is_date_identifier(column) {
                if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                    return ScalarFilter::Date(parsed);
                }
            }
            ScalarFilter::Text(text.clone())
        }
        other => ScalarFilter::Text(other.to_string()),
    }
}

fn is_uuid_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized == "id" || normalized.ends_with("_id")
}

fn is_date_identifier(identifier: &str) -> bool {
    let normalized = identifier.trim();
    normalized.ends_with("_date") || matches!(normalized, "period_start" | "period_end")
}

fn is_timestamp_identifier(identifier: &str) -> bool {
    identifier.trim().ends_with("_at")
}

pub(crate) fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    let is_unique_violation = error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .is_some_and(|code| code == "23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint");
    if is_unique_violation {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}
