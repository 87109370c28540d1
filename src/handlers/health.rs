//! Liveness and dependency health

use axum::{extract::State, Json};

use crate::models::HealthResponse;
use crate::state::AppState;

pub async fn root() -> &'static str {
    "Koperasi Back Office API"
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match &state.database {
        Some(db) => db.describe_health().await,
        None => "in-memory".to_string(),
    };
    let healthy = database == "connected" || database == "in-memory";

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        database,
        scheduler_running: state.scheduler.is_running().await,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
