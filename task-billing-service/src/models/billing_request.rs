//! Per-task billing request carried by an invoice creation call.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::BillingType;

/// One task to bill on a new invoice. `amount_to_bill` is authoritative for
/// the resulting line; the rest describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBillingRequest {
    pub task_id: Uuid,
    pub billing_type: BillingType,
    pub percentage_to_bill: Decimal,
    pub amount_to_bill: Decimal,
    #[serde(default)]
    pub total_budget: Decimal,
    #[serde(default)]
    pub previous_billed_percentage: Decimal,
    #[serde(default)]
    pub previous_billed_amount: Decimal,
}
