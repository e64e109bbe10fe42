use axum::{routing::get, Router};

use crate::state::AppState;

pub mod health;
pub mod payment_statements;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(payment_statements::router())
}
