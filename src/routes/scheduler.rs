//! Scheduler route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn scheduler_routes() -> Router<AppState> {
    Router::new()
        .route("/api/scheduler/status", get(scheduler_status))
        .route("/api/scheduler/trigger/reminders", post(trigger_reminders))
        .route("/api/scheduler/trigger/pending", post(trigger_pending))
        .route("/api/scheduler/trigger/dpd", post(trigger_dpd))
}
