//! Notification route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", post(schedule_notification))
        .route("/api/notifications/pending", get(pending_notifications))
        .route("/api/notifications/test", post(send_test_notification))
        .route(
            "/api/installments/:id/notifications",
            get(installment_notifications),
        )
}
