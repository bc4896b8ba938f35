//! Invoice creation: header first, then one line and one ledger advance per
//! billed task.
//!
//! Only a failed header aborts. After that the invoice exists with its
//! totals, so each task is billed independently and failures are collected
//! instead of stopping the run. An invoice never ends up without lines.

use super::ledger::advanced;
use super::line_items::{fallback_line_item, line_item_for_request, validate_request};
use super::BillingEngine;
use crate::error::{
    BillingError, FailureStage, ReconciliationWarning, Step, TaskBillingFailure,
};
use crate::models::{Invoice, InvoiceStatus, LineItem, NewInvoice, TaskBillingRequest};
use crate::services::metrics::{
    INVOICES_CREATED_TOTAL, LINE_ITEM_FAILURES_TOTAL, RECONCILIATION_WARNINGS_TOTAL,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CreateInvoiceInput {
    /// Generated when absent.
    pub invoice_number: Option<String>,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub project_name: Option<String>,
    pub status: InvoiceStatus,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub tasks: Vec<TaskBillingRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreationOutcome {
    pub invoice: Invoice,
    pub line_items: Vec<LineItem>,
    /// Tasks that could not be fully billed. The invoice exists regardless.
    pub failures: Vec<TaskBillingFailure>,
    pub used_fallback: bool,
    pub reconciliation: Option<ReconciliationWarning>,
}

impl CreationOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn per-task failures into [`BillingError::PartialFailure`].
    pub fn into_complete(self) -> Result<Self, BillingError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(BillingError::PartialFailure {
                invoice_id: self.invoice.invoice_id,
                failures: self.failures,
            })
        }
    }

    fn outcome_label(&self) -> &'static str {
        if self.used_fallback {
            "fallback"
        } else if self.failures.is_empty() {
            "complete"
        } else {
            "partial"
        }
    }
}

fn failure(task_id: Uuid, stage: FailureStage, err: impl std::fmt::Display) -> TaskBillingFailure {
    TaskBillingFailure {
        task_id,
        stage,
        message: err.to_string(),
    }
}

impl BillingEngine {
    #[instrument(
        skip(self, input),
        fields(client_id = %input.client_id, tasks = input.tasks.len())
    )]
    pub async fn create_invoice(
        &self,
        input: CreateInvoiceInput,
    ) -> Result<CreationOutcome, BillingError> {
        let header = NewInvoice {
            invoice_number: input
                .invoice_number
                .clone()
                .unwrap_or_else(|| self.numbering.next_number()),
            client_id: input.client_id,
            project_id: input.project_id,
            project_name: input.project_name.clone(),
            status: input.status,
            subtotal: input.subtotal,
            tax_rate: input.tax_rate,
            tax_amount: input.tax_amount,
            total: input.total,
            consolidated_from: Vec::new(),
        };

        let invoice = self.store.create_invoice(&header).await.map_err(|e| {
            error!(step = %Step::Invoice, error = %e, "Failed to create invoice header");
            INVOICES_CREATED_TOTAL.with_label_values(&["failed"]).inc();
            BillingError::from(e)
        })?;

        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Invoice header created"
        );

        let mut line_items = Vec::with_capacity(input.tasks.len());
        let mut failures = Vec::new();

        for (index, request) in input.tasks.iter().enumerate() {
            if let Err(failure) = self
                .bill_task(&invoice, request, index as i32, &mut line_items)
                .await
            {
                warn!(
                    invoice_id = %invoice.invoice_id,
                    task_id = %failure.task_id,
                    stage = failure.stage.as_str(),
                    error = %failure.message,
                    "Task billing failed; continuing with remaining tasks"
                );
                LINE_ITEM_FAILURES_TOTAL
                    .with_label_values(&[failure.stage.as_str()])
                    .inc();
                failures.push(failure);
            }
        }

        let existing = match self.store.count_line_items(invoice.invoice_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    invoice_id = %invoice.invoice_id,
                    error = %e,
                    "Could not count line items; using inserted count"
                );
                line_items.len() as i64
            }
        };

        let mut used_fallback = false;
        if existing == 0 {
            let fallback = fallback_line_item(invoice.invoice_id, &input.tasks, invoice.subtotal);
            let item = self.store.insert_line_item(&fallback).await.map_err(|e| {
                error!(
                    invoice_id = %invoice.invoice_id,
                    step = %Step::LineItems,
                    error = %e,
                    "Invoice has no line items and the fallback insert failed"
                );
                BillingError::step(
                    Step::LineItems,
                    format!(
                        "invoice {} was created without line items: {}",
                        invoice.invoice_id, e
                    ),
                )
            })?;
            warn!(
                invoice_id = %invoice.invoice_id,
                amount = %item.amount,
                "No task line items were created; inserted fallback line item"
            );
            line_items.push(item);
            used_fallback = true;
        }

        let actual: Decimal = line_items.iter().map(|item| item.amount).sum();
        let reconciliation = if self.reconciles(invoice.subtotal, actual) {
            None
        } else {
            let warning = ReconciliationWarning {
                expected: invoice.subtotal,
                actual,
            };
            warn!(invoice_id = %invoice.invoice_id, %warning, "Created invoice does not reconcile");
            RECONCILIATION_WARNINGS_TOTAL
                .with_label_values(&["create"])
                .inc();
            Some(warning)
        };

        let outcome = CreationOutcome {
            invoice,
            line_items,
            failures,
            used_fallback,
            reconciliation,
        };

        INVOICES_CREATED_TOTAL
            .with_label_values(&[outcome.outcome_label()])
            .inc();
        info!(
            invoice_id = %outcome.invoice.invoice_id,
            line_items = outcome.line_items.len(),
            failures = outcome.failures.len(),
            outcome = outcome.outcome_label(),
            "Invoice created"
        );

        Ok(outcome)
    }

    async fn bill_task(
        &self,
        invoice: &Invoice,
        request: &TaskBillingRequest,
        sort_order: i32,
        line_items: &mut Vec<LineItem>,
    ) -> Result<(), TaskBillingFailure> {
        let task_id = request.task_id;
        let mode = request.billing_type.mode();

        validate_request(request).map_err(|e| failure(task_id, FailureStage::LineItem, e))?;

        let task = match self.store.get_task(task_id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task lookup failed; billing from request alone");
                None
            }
        };

        let new_item = line_item_for_request(invoice.invoice_id, request, task.as_ref(), sort_order)
            .map_err(|e| failure(task_id, FailureStage::LineItem, e))?;
        // The ledger moves by exactly what the line records.
        let delta_amount = new_item.amount;
        let delta_percentage = new_item
            .billed_percentage
            .unwrap_or(request.percentage_to_bill);

        // Refuse up front what the ledger would refuse, so a conflicting task
        // doesn't leave a line behind. The ledger re-checks under CAS.
        if let Some(task) = &task {
            advanced(
                task_id,
                &task.billing(),
                delta_percentage,
                delta_amount,
                mode,
                self.settings.enforce_budget_ceiling,
            )
            .map_err(|e| failure(task_id, FailureStage::Ledger, e))?;
        }

        let item = self
            .store
            .insert_line_item(&new_item)
            .await
            .map_err(|e| failure(task_id, FailureStage::LineItem, e))?;
        line_items.push(item);

        self.ledger
            .advance(task_id, delta_percentage, delta_amount, mode)
            .await
            .map_err(|e| failure(task_id, FailureStage::Ledger, e))?;

        Ok(())
    }
}
