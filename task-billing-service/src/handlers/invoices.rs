use crate::dtos::{
    ConsolidationResponse, CreateInvoiceRequest, CreateInvoiceResponse, DeletionResponse,
    InvoiceIdsRequest, InvoiceResponse,
};
use crate::models::InvoiceStatus;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

/// Create an invoice and bill its tasks. Per-task failures come back as
/// `warnings` on a 201; only a failed header is an error.
#[tracing::instrument(skip(state, request), fields(client_id = %request.client_id))]
pub async fn create_invoice(
    State(state): State<AppState>,
    Json(request): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<CreateInvoiceResponse>), AppError> {
    request.validate()?;

    if request.status == Some(InvoiceStatus::Consolidated) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Consolidated invoices can only be created by consolidation"
        )));
    }

    let outcome = state.engine.create_invoice(request.into_input()).await?;

    if !outcome.is_complete() {
        tracing::warn!(
            invoice_id = %outcome.invoice.invoice_id,
            failures = outcome.failures.len(),
            "Invoice created with billing warnings"
        );
    }

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let invoice = state
        .store
        .get_invoice(invoice_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))?;
    let line_items = state.store.list_line_items(&[invoice_id]).await?;

    Ok(Json(InvoiceResponse {
        invoice,
        line_items,
    }))
}

#[tracing::instrument(skip(state))]
pub async fn delete_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<DeletionResponse>, AppError> {
    let report = state.engine.delete_invoice(invoice_id).await?;
    Ok(Json(report.into()))
}

#[tracing::instrument(skip(state, request), fields(count = request.invoice_ids.len()))]
pub async fn bulk_delete_invoices(
    State(state): State<AppState>,
    Json(request): Json<InvoiceIdsRequest>,
) -> Result<Json<DeletionResponse>, AppError> {
    request.validate()?;
    let report = state.engine.delete_invoices(&request.invoice_ids).await?;
    Ok(Json(report.into()))
}

#[tracing::instrument(skip(state, request), fields(count = request.invoice_ids.len()))]
pub async fn consolidate_invoices(
    State(state): State<AppState>,
    Json(request): Json<InvoiceIdsRequest>,
) -> Result<(StatusCode, Json<ConsolidationResponse>), AppError> {
    request.validate()?;
    let outcome = state
        .engine
        .consolidate_invoices(&request.invoice_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}
