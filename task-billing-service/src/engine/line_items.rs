//! Line item generation for task billing requests.
//!
//! Pure functions: the caller fetches the task (if it can) and hands it in.

use crate::error::ValidationError;
use crate::models::{max_money, positive, NewLineItem, Task, TaskBillingRequest};
use rust_decimal::Decimal;
use uuid::Uuid;

const FULL: Decimal = Decimal::ONE_HUNDRED;

/// Scale of stored percentages, NUMERIC(7, 4).
const PERCENTAGE_DP: u32 = 4;
/// Scale of stored money, NUMERIC(14, 2).
const MONEY_DP: u32 = 2;

/// Reject requests that can't produce a meaningful line.
pub fn validate_request(request: &TaskBillingRequest) -> Result<(), ValidationError> {
    let reason = if request.percentage_to_bill.round_dp(PERCENTAGE_DP) <= Decimal::ZERO {
        Some("percentage to bill must be positive")
    } else if request.percentage_to_bill > FULL {
        Some("percentage to bill cannot exceed 100")
    } else if request.amount_to_bill < Decimal::ZERO {
        Some("amount to bill cannot be negative")
    } else if request.amount_to_bill > max_money() || request.total_budget > max_money() {
        Some("amount exceeds the largest storable value")
    } else if request.total_budget < Decimal::ZERO {
        Some("total budget cannot be negative")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ValidationError::InvalidBillingRequest {
            task_id: request.task_id,
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Build the line item for one billing request.
///
/// The task's estimated hours act as the quantity whatever its billing unit;
/// the billed quantity is that share of it. `amount_to_bill` is copied as is
/// rather than recomputed from rate and quantity. Without a task the line is
/// still produced from the request alone, priced per whole task.
///
/// Amount and percentage are rounded to their stored scale here, once; the
/// ledger must be advanced by the values on the returned line so a later
/// rollback subtracts exactly what was added.
pub fn line_item_for_request(
    invoice_id: Uuid,
    request: &TaskBillingRequest,
    task: Option<&Task>,
    sort_order: i32,
) -> Result<NewLineItem, ValidationError> {
    let out_of_range = || ValidationError::InvalidBillingRequest {
        task_id: request.task_id,
        reason: "billing amounts are out of range".to_string(),
    };

    let quantity = task
        .and_then(|t| positive(t.estimated_hours))
        .unwrap_or(Decimal::ONE);

    let total_fees = match positive(Some(request.total_budget))
        .or_else(|| task.and_then(Task::effective_budget))
    {
        Some(fees) => fees,
        None => derived_budget(request).ok_or_else(out_of_range)?,
    };

    let unit_price = total_fees
        .checked_div(quantity)
        .ok_or_else(out_of_range)?
        .round_dp(MONEY_DP);
    let billed_quantity = quantity
        .checked_mul(request.percentage_to_bill)
        .and_then(|q| q.checked_div(FULL))
        .ok_or_else(out_of_range)?
        .round_dp(MONEY_DP);

    Ok(NewLineItem {
        invoice_id,
        task_id: Some(request.task_id),
        description: describe(request, task),
        quantity: billed_quantity,
        unit_price,
        amount: request.amount_to_bill.round_dp(MONEY_DP),
        billed_percentage: Some(request.percentage_to_bill.round_dp(PERCENTAGE_DP)),
        billing_type: Some(request.billing_type),
        task_total_budget: Some(total_fees.round_dp(MONEY_DP)),
        sort_order,
    })
}

/// The single line an invoice gets when none of its task lines survived.
pub fn fallback_line_item(
    invoice_id: Uuid,
    requests: &[TaskBillingRequest],
    subtotal: Decimal,
) -> NewLineItem {
    let description = if requests.len() <= 1 {
        "Task billing".to_string()
    } else {
        format!("{} tasks billed", requests.len())
    };

    let amount = if subtotal > Decimal::ZERO {
        subtotal
    } else {
        requests
            .iter()
            .map(|r| r.amount_to_bill)
            .try_fold(Decimal::ZERO, Decimal::checked_add)
            .unwrap_or(subtotal)
    }
    .round_dp(MONEY_DP);

    NewLineItem {
        invoice_id,
        task_id: None,
        description,
        quantity: Decimal::ONE,
        unit_price: amount,
        amount,
        billed_percentage: None,
        billing_type: None,
        task_total_budget: None,
        sort_order: 0,
    }
}

// Budget implied by billing `amount` for `percentage` of the task.
fn derived_budget(request: &TaskBillingRequest) -> Option<Decimal> {
    if request.percentage_to_bill > Decimal::ZERO {
        request
            .amount_to_bill
            .checked_mul(FULL)?
            .checked_div(request.percentage_to_bill)
    } else {
        Some(request.amount_to_bill)
    }
}

fn describe(request: &TaskBillingRequest, task: Option<&Task>) -> String {
    let name = match task {
        Some(task) => task.name.clone(),
        None => format!("Task {}", request.task_id),
    };
    format!(
        "{} ({} {}%)",
        name,
        request.billing_type.as_str(),
        request.percentage_to_bill.normalize()
    )
}
