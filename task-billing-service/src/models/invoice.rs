//! Invoice model for task-billing-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
    Consolidated,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Consolidated => "consolidated",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub project_name: Option<String>,
    pub status: InvoiceStatus,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    /// Set on a source invoice once it has been merged into another.
    pub consolidated_into: Option<Uuid>,
    /// Source ids; non-empty only on a consolidated invoice.
    pub consolidated_from: Vec<Uuid>,
    pub created_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn is_consolidated(&self) -> bool {
        !self.consolidated_from.is_empty()
    }

    /// Label used to keep provenance visible on merged line items.
    pub fn provenance_label(&self) -> &str {
        self.project_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.invoice_number)
    }
}

/// Input for creating an invoice header.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub project_name: Option<String>,
    pub status: InvoiceStatus,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub consolidated_from: Vec<Uuid>,
}
