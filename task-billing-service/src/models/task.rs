//! Task model and its cumulative billing state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How a task is billed. Exclusive once chosen: a task billed by time can
/// never receive percentage or milestone lines, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingMode {
    Unset,
    Time,
    Percentage,
    Milestone,
}

impl BillingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Time => "time",
            Self::Percentage => "percentage",
            Self::Milestone => "milestone",
        }
    }

    /// Mode the task ends up in after billing it as `requested`.
    ///
    /// `Unset` locks to whatever is requested; any other mode only accepts
    /// itself. Requesting `Unset` never changes the current mode.
    pub fn lock_to(self, requested: BillingMode) -> Option<BillingMode> {
        match (self, requested) {
            (current, BillingMode::Unset) => Some(current),
            (BillingMode::Unset, requested) => Some(requested),
            (current, requested) if current == requested => Some(current),
            _ => None,
        }
    }
}

impl std::fmt::Display for BillingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit the task's estimate is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingUnit {
    Hours,
    Unit,
}

/// Task row as the billing engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    /// Hours for hourly tasks, item count for unit-priced ones.
    pub estimated_hours: Option<Decimal>,
    pub estimated_fees: Option<Decimal>,
    pub total_budget: Option<Decimal>,
    pub billing_unit: BillingUnit,
    pub billing_mode: BillingMode,
    pub billed_percentage: Decimal,
    pub billed_amount: Decimal,
}

impl Task {
    /// Recorded budget, falling back to the fee estimate.
    pub fn effective_budget(&self) -> Option<Decimal> {
        positive(self.total_budget).or_else(|| positive(self.estimated_fees))
    }

    pub fn billing(&self) -> TaskBilling {
        TaskBilling {
            mode: self.billing_mode,
            billed_percentage: self.billed_percentage,
            billed_amount: self.billed_amount,
        }
    }
}

/// The mutable billing columns of a task. Ledger writes are conditional on
/// the whole value, so it doubles as the optimistic-lock token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBilling {
    pub mode: BillingMode,
    pub billed_percentage: Decimal,
    pub billed_amount: Decimal,
}

/// Percentage and amount billed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilledState {
    pub percentage: Decimal,
    pub amount: Decimal,
}

impl From<TaskBilling> for BilledState {
    fn from(billing: TaskBilling) -> Self {
        Self {
            percentage: billing.billed_percentage,
            amount: billing.billed_amount,
        }
    }
}

pub(crate) fn positive(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| *v > Decimal::ZERO)
}
