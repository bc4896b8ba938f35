//! Line item model for task-billing-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::BillingMode;

/// Largest amount a NUMERIC(14, 2) money column holds.
pub fn max_money() -> Decimal {
    Decimal::new(99_999_999_999_999, 2)
}

/// How a task-based line was billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingType {
    Milestone,
    Percentage,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::Milestone => "milestone",
            BillingType::Percentage => "percentage",
        }
    }

    /// Mode a task is locked into when first billed this way.
    pub fn mode(self) -> BillingMode {
        match self {
            BillingType::Milestone => BillingMode::Milestone,
            BillingType::Percentage => BillingMode::Percentage,
        }
    }

    pub fn from_mode(mode: BillingMode) -> Option<Self> {
        match mode {
            BillingMode::Milestone => Some(BillingType::Milestone),
            BillingMode::Percentage => Some(BillingType::Percentage),
            BillingMode::Unset | BillingMode::Time => None,
        }
    }
}

/// Line item on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub task_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub billed_percentage: Option<Decimal>,
    pub billing_type: Option<BillingType>,
    /// Task budget at the time the line was billed.
    pub task_total_budget: Option<Decimal>,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a line item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub invoice_id: Uuid,
    pub task_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub billed_percentage: Option<Decimal>,
    pub billing_type: Option<BillingType>,
    pub task_total_budget: Option<Decimal>,
    pub sort_order: i32,
}

impl NewLineItem {
    /// Copy of an existing line onto another invoice, description prefixed
    /// with `[label]`.
    pub fn copied_from(item: &LineItem, invoice_id: Uuid, label: &str, sort_order: i32) -> Self {
        Self {
            invoice_id,
            task_id: item.task_id,
            description: format!("[{}] {}", label, item.description),
            quantity: item.quantity,
            unit_price: item.unit_price,
            amount: item.amount,
            billed_percentage: item.billed_percentage,
            billing_type: item.billing_type,
            task_total_budget: item.task_total_budget,
            sort_order,
        }
    }
}
