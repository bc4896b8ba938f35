use crate::dtos::{TaskBillingResponse, TaskModeResponse};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

pub async fn get_task_billing(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskBillingResponse>, AppError> {
    let billed = state.engine.ledger().current_billed(task_id).await?;

    Ok(Json(TaskBillingResponse {
        task_id,
        billed_percentage: billed.percentage,
        billed_amount: billed.amount,
    }))
}

/// Lock a task into time billing ahead of its first time entry.
#[tracing::instrument(skip(state))]
pub async fn lock_time_mode(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskModeResponse>, AppError> {
    let billing = state.engine.ledger().lock_time_mode(task_id).await?;

    Ok(Json(TaskModeResponse {
        task_id,
        billing_mode: billing.mode,
        billed_percentage: billing.billed_percentage,
        billed_amount: billing.billed_amount,
    }))
}
