//! Scheduler status and manual trigger handlers

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::ApiResponse;
use crate::scheduler::{ReminderScheduler, SchedulerStatus, TriggerResult};

/// GET /api/scheduler/status
pub async fn scheduler_status(
    State(scheduler): State<Arc<ReminderScheduler>>,
) -> Json<ApiResponse<SchedulerStatus>> {
    Json(ApiResponse::ok(scheduler.status().await))
}

/// POST /api/scheduler/trigger/reminders
pub async fn trigger_reminders(
    State(scheduler): State<Arc<ReminderScheduler>>,
) -> Json<ApiResponse<TriggerResult>> {
    Json(trigger_response(scheduler.trigger_reminder_pass().await))
}

/// POST /api/scheduler/trigger/pending
pub async fn trigger_pending(
    State(scheduler): State<Arc<ReminderScheduler>>,
) -> Json<ApiResponse<TriggerResult>> {
    Json(trigger_response(scheduler.trigger_pending_drain().await))
}

/// POST /api/scheduler/trigger/dpd
pub async fn trigger_dpd(
    State(scheduler): State<Arc<ReminderScheduler>>,
) -> Json<ApiResponse<TriggerResult>> {
    Json(trigger_response(scheduler.trigger_dpd_sweep().await))
}

fn trigger_response(result: TriggerResult) -> ApiResponse<TriggerResult> {
    ApiResponse {
        success: result.success,
        message: Some(result.message.clone()),
        error: (!result.success).then(|| result.message.clone()),
        data: Some(result),
    }
}
