//! Request and response bodies for the HTTP surface.

use crate::engine::{ConsolidationOutcome, CreateInvoiceInput, CreationOutcome, DeletionReport};
use crate::error::{ReconciliationWarning, TaskBillingFailure};
use crate::models::{
    max_money, BillingType, Invoice, InvoiceStatus, LineItem, TaskBillingRequest,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Non-negative and small enough for a money column.
fn money(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > max_money() {
        return Err(ValidationError::new("money"));
    }
    Ok(())
}

fn percentage(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("percentage"));
    }
    Ok(())
}

fn billable_percentage(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO || *value > Decimal::ONE_HUNDRED {
        return Err(ValidationError::new("billable_percentage"));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BillTaskRequest {
    pub task_id: Uuid,
    pub billing_type: BillingType,
    #[validate(custom(function = "billable_percentage"))]
    pub percentage_to_bill: Decimal,
    #[validate(custom(function = "money"))]
    pub amount_to_bill: Decimal,
    #[serde(default)]
    #[validate(custom(function = "money"))]
    pub total_budget: Decimal,
    #[serde(default)]
    #[validate(custom(function = "percentage"))]
    pub previous_billed_percentage: Decimal,
    #[serde(default)]
    #[validate(custom(function = "money"))]
    pub previous_billed_amount: Decimal,
}

impl From<BillTaskRequest> for TaskBillingRequest {
    fn from(req: BillTaskRequest) -> Self {
        Self {
            task_id: req.task_id,
            billing_type: req.billing_type,
            percentage_to_bill: req.percentage_to_bill,
            amount_to_bill: req.amount_to_bill,
            total_budget: req.total_budget,
            previous_billed_percentage: req.previous_billed_percentage,
            previous_billed_amount: req.previous_billed_amount,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    #[validate(length(min = 1, max = 64, message = "Invoice number must be 1-64 characters"))]
    pub invoice_number: Option<String>,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    #[validate(length(max = 255))]
    pub project_name: Option<String>,
    pub status: Option<InvoiceStatus>,
    #[validate(custom(function = "money"))]
    pub subtotal: Decimal,
    #[serde(default)]
    #[validate(custom(function = "percentage"))]
    pub tax_rate: Decimal,
    /// Derived from the subtotal and rate when absent.
    #[validate(custom(function = "money"))]
    pub tax_amount: Option<Decimal>,
    #[validate(custom(function = "money"))]
    pub total: Option<Decimal>,
    #[serde(default)]
    #[validate(nested)]
    pub tasks: Vec<BillTaskRequest>,
}

impl CreateInvoiceRequest {
    pub fn into_input(self) -> CreateInvoiceInput {
        let tax_amount = self
            .tax_amount
            .unwrap_or_else(|| (self.subtotal * self.tax_rate / Decimal::ONE_HUNDRED).round_dp(2));
        let total = self.total.unwrap_or(self.subtotal + tax_amount);

        CreateInvoiceInput {
            invoice_number: self.invoice_number,
            client_id: self.client_id,
            project_id: self.project_id,
            project_name: self.project_name,
            status: self.status.unwrap_or(InvoiceStatus::Draft),
            subtotal: self.subtotal,
            tax_rate: self.tax_rate,
            tax_amount,
            total,
            tasks: self.tasks.into_iter().map(TaskBillingRequest::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateInvoiceResponse {
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
    /// Tasks that failed to bill; the invoice was still created.
    pub warnings: Vec<TaskBillingFailure>,
    pub used_fallback: bool,
    pub reconciliation: Option<ReconciliationWarning>,
}

impl From<CreationOutcome> for CreateInvoiceResponse {
    fn from(outcome: CreationOutcome) -> Self {
        Self {
            invoice: outcome.invoice,
            line_items: outcome.line_items,
            warnings: outcome.failures,
            used_fallback: outcome.used_fallback,
            reconciliation: outcome.reconciliation,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InvoiceIdsRequest {
    #[validate(length(min = 1, max = 100, message = "Provide between 1 and 100 invoice ids"))]
    pub invoice_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DeletionResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: DeletionReport,
}

impl From<DeletionReport> for DeletionResponse {
    fn from(report: DeletionReport) -> Self {
        Self {
            success: true,
            report,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConsolidationResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: ConsolidationOutcome,
}

impl From<ConsolidationOutcome> for ConsolidationResponse {
    fn from(outcome: ConsolidationOutcome) -> Self {
        Self {
            success: true,
            outcome,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskBillingResponse {
    pub task_id: Uuid,
    pub billed_percentage: Decimal,
    pub billed_amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct TaskModeResponse {
    pub task_id: Uuid,
    pub billing_mode: crate::models::BillingMode,
    pub billed_percentage: Decimal,
    pub billed_amount: Decimal,
}
