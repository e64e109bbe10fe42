use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use chrono_tz::Tz;

use crate::{
    auth::require_viewer,
    db::db_pool,
    error::{AppError, AppResult},
    repository::payout_store::PgPayoutStore,
    schemas::{validate_input, GenerateStatementInput},
    services::statements::{generate_statement, Statement},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/payment-statements",
        axum::routing::post(create_payment_statement),
    )
}

async fn create_payment_statement(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<GenerateStatementInput>, JsonRejection>,
) -> AppResult<Json<Statement>> {
    let distinct_status = state.config.statement_distinct_error_status;
    build_statement(&state, &headers, payload)
        .await
        .map(Json)
        .map_err(|error| {
            if distinct_status {
                error
            } else {
                error.collapsed()
            }
        })
}

async fn build_statement(
    state: &AppState,
    headers: &HeaderMap,
    payload: Result<Json<GenerateStatementInput>, JsonRejection>,
) -> AppResult<Statement> {
    let viewer = require_viewer(state, headers).await?;
    tracing::debug!(
        viewer_id = %viewer.id,
        viewer_email = viewer.email.as_deref(),
        "Resolved statement viewer"
    );
    let Json(input) =
        payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    validate_input(&input)?;

    let store = PgPayoutStore::new(db_pool(state)?.clone());
    let timezone = resolve_timezone(input.timezone.as_deref(), &state.config.default_timezone);
    generate_statement(&store, &viewer, &input, timezone, Utc::now()).await
}

/// Requested zone first, then the configured default, then UTC.
fn resolve_timezone(requested: Option<&str>, default_timezone: &str) -> Tz {
    let requested = requested.map(str::trim).filter(|value| !value.is_empty());
    if let Some(name) = requested {
        match name.parse::<Tz>() {
            Ok(zone) => return zone,
            Err(_) => tracing::warn!(timezone = name, "Unknown timezone requested, using default"),
        }
    }
    default_timezone.parse::<Tz>().unwrap_or(Tz::UTC)
}
