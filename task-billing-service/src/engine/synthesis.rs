//! Reconstruction of line items for invoices that lost theirs.
//!
//! An invoice with a positive total and no lines can't be merged as is; its
//! lines are rebuilt from the billed tasks of its project. When those don't
//! add up to the invoice total, one catch-all line for the whole total is
//! used instead.

use crate::models::{positive, BillingType, Invoice, NewLineItem, Task};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisKind {
    PerTask,
    CatchAll,
}

impl SynthesisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisKind::PerTask => "per_task",
            SynthesisKind::CatchAll => "catch_all",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Synthesized {
    pub kind: SynthesisKind,
    pub items: Vec<NewLineItem>,
}

/// Whether `invoice` needs reconstructed lines.
pub fn needs_synthesis(invoice: &Invoice, line_item_count: usize) -> bool {
    line_item_count == 0 && invoice.total > Decimal::ZERO
}

/// Rebuild lines for `source` onto invoice `target_id`, numbering them from
/// `first_sort_order`. `billed_tasks` are the billed tasks of the source's
/// project, empty when it has none.
pub fn synthesize_for_invoice(
    source: &Invoice,
    billed_tasks: &[Task],
    target_id: Uuid,
    first_sort_order: i32,
    tolerance: Decimal,
) -> Synthesized {
    let label = source.provenance_label();

    let per_task: Vec<NewLineItem> = billed_tasks
        .iter()
        .filter_map(|task| {
            let amount = task_amount(task)?;
            Some((task, amount))
        })
        .enumerate()
        .map(|(index, (task, amount))| NewLineItem {
            invoice_id: target_id,
            task_id: Some(task.task_id),
            description: format!("[{}] {}", label, task.name),
            quantity: Decimal::ONE,
            unit_price: amount,
            amount,
            billed_percentage: Some(task.billed_percentage),
            billing_type: BillingType::from_mode(task.billing_mode),
            task_total_budget: task.effective_budget(),
            sort_order: first_sort_order + index as i32,
        })
        .collect();

    let sum: Decimal = per_task.iter().map(|item| item.amount).sum();
    if !per_task.is_empty() && (sum - source.total).abs() <= tolerance {
        return Synthesized {
            kind: SynthesisKind::PerTask,
            items: per_task,
        };
    }

    Synthesized {
        kind: SynthesisKind::CatchAll,
        items: vec![catch_all(source, label, target_id, first_sort_order)],
    }
}

fn task_amount(task: &Task) -> Option<Decimal> {
    positive(Some(task.billed_amount))
        .or_else(|| task.effective_budget())
        .map(|amount| amount.round_dp(2))
}

fn catch_all(source: &Invoice, label: &str, target_id: Uuid, sort_order: i32) -> NewLineItem {
    let description = if label == source.invoice_number {
        format!("[{}] Invoice total", label)
    } else {
        format!("[{}] Invoice {}", label, source.invoice_number)
    };

    NewLineItem {
        invoice_id: target_id,
        task_id: None,
        description,
        quantity: Decimal::ONE,
        unit_price: source.total,
        amount: source.total,
        billed_percentage: None,
        billing_type: None,
        task_total_budget: None,
        sort_order,
    }
}
