// Handlers module
// HTTP handlers for the polls API

pub mod accounts;
pub mod polls;

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::{app::AppState, error::ApiError};

/// Liveness check
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check: answers only when the database does
pub async fn readiness(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state.db.health_check().await?;
    Ok((StatusCode::OK, "OK"))
}
