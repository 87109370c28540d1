//! Notification API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::notification::{
    NotificationDispatcher, NotificationLog, ScheduleNotificationRequest, ScheduleOutcome,
    TestNotificationRequest,
};

/// POST /api/notifications
///
/// 201 when a log was created, 200 when one already existed for today.
pub async fn schedule_notification(
    State(dispatcher): State<Arc<NotificationDispatcher>>,
    Json(request): Json<ScheduleNotificationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ScheduleOutcome>>), ApiError> {
    let outcome = dispatcher.schedule(request, Utc::now()).await?;
    let status = if outcome.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ApiResponse::ok(outcome))))
}

/// GET /api/notifications/pending
pub async fn pending_notifications(
    State(dispatcher): State<Arc<NotificationDispatcher>>,
) -> Result<Json<ApiResponse<Vec<NotificationLog>>>, ApiError> {
    let logs = dispatcher.pending_notifications(Utc::now()).await?;
    Ok(Json(ApiResponse::ok(logs)))
}

/// POST /api/notifications/test
pub async fn send_test_notification(
    State(dispatcher): State<Arc<NotificationDispatcher>>,
    Json(request): Json<TestNotificationRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    dispatcher.send_test(request).await?;
    Ok(Json(ApiResponse::message("Test notification sent")))
}

/// GET /api/installments/:id/notifications
pub async fn installment_notifications(
    State(dispatcher): State<Arc<NotificationDispatcher>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<NotificationLog>>>, ApiError> {
    let logs = dispatcher.logs_for_installment(id).await?;
    Ok(Json(ApiResponse::ok(logs)))
}
