//! Error taxonomy for the billing engine.

use crate::models::{BillingMode, InvoiceStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Stage of a multi-step operation, used to tag how far it got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Validation,
    TimeEntries,
    LineItems,
    Invoice,
    SourceLineItems,
    InsertLineItems,
    MarkSources,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Validation => "validation",
            Step::TimeEntries => "time_entries",
            Step::LineItems => "line_items",
            Step::Invoice => "invoice",
            Step::SourceLineItems => "source_line_items",
            Step::InsertLineItems => "insert_line_items",
            Step::MarkSources => "mark_sources",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Precondition failures. Never retried; the message is shown to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Select at least two invoices to consolidate")]
    TooFewInvoices,

    #[error("Invoices not found: {}", join_ids(.0))]
    InvoicesNotFound(Vec<Uuid>),

    #[error("All invoices must belong to the same client")]
    MixedClients,

    #[error("Invoice {invoice_number} is {status}; only draft invoices can be consolidated")]
    NotDraft {
        invoice_number: String,
        status: InvoiceStatus,
    },

    #[error("Invoice {invoice_number} has already been consolidated into another invoice")]
    AlreadyConsolidated { invoice_number: String },

    #[error("Invoice {invoice_number} is itself a consolidated invoice and cannot be merged again")]
    NestedConsolidation { invoice_number: String },

    #[error(
        "Invoice {invoice_number} is part of a consolidated invoice; delete the consolidated invoice first"
    )]
    ConsolidatedSource { invoice_number: String },

    #[error("Task {task_id}: {reason}")]
    InvalidBillingRequest { task_id: Uuid, reason: String },
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where a single task's billing broke during invoice creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    LineItem,
    Ledger,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::LineItem => "line_item",
            FailureStage::Ledger => "ledger",
        }
    }
}

/// One task that could not be fully billed on an otherwise created invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskBillingFailure {
    pub task_id: Uuid,
    pub stage: FailureStage,
    pub message: String,
}

/// Line items that don't add up to the invoice total. Logged, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReconciliationWarning {
    pub expected: Decimal,
    pub actual: Decimal,
}

impl ReconciliationWarning {
    pub fn difference(&self) -> Decimal {
        self.actual - self.expected
    }
}

impl std::fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line items sum to {} but invoice total is {} (difference {})",
            self.actual,
            self.expected,
            self.difference()
        )
    }
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invoice {0} not found")]
    InvoiceNotFound(Uuid),

    #[error("Task {0} not found")]
    TaskNotFound(Uuid),

    #[error("Task {task_id} is billed by {current}; it cannot receive {requested} billing")]
    ModeConflict {
        task_id: Uuid,
        current: BillingMode,
        requested: BillingMode,
    },

    #[error("Billing task {task_id} would bring it to {attempted}% of its budget")]
    BudgetExceeded { task_id: Uuid, attempted: Decimal },

    #[error("Task {task_id} kept changing underneath {attempts} billing updates")]
    ConcurrentModification { task_id: Uuid, attempts: u32 },

    #[error("Failed at step '{step}': {message}")]
    StepFailure { step: Step, message: String },

    #[error("Invoice {invoice_id} created but {} task(s) failed to bill", .failures.len())]
    PartialFailure {
        invoice_id: Uuid,
        failures: Vec<TaskBillingFailure>,
    },

    #[error(transparent)]
    Store(#[from] AppError),
}

impl BillingError {
    pub fn step(step: Step, err: impl std::fmt::Display) -> Self {
        BillingError::StepFailure {
            step,
            message: err.to_string(),
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(e) => AppError::BadRequest(anyhow::anyhow!(e)),
            BillingError::InvoiceNotFound(_) | BillingError::TaskNotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            BillingError::ModeConflict { .. }
            | BillingError::BudgetExceeded { .. }
            | BillingError::ConcurrentModification { .. }
            | BillingError::PartialFailure { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            BillingError::StepFailure { .. } => AppError::InternalError(anyhow::anyhow!(err)),
            BillingError::Store(e) => e,
        }
    }
}
