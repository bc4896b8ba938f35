//! Invoice deletion and ledger rollback.
//!
//! Order matters: nothing is touched until validation passes, and task
//! billing is only rolled back once the invoices are gone. A failure before
//! that point is a [`BillingError::StepFailure`]; failures after it are
//! recorded on the report, since the invoices can't be un-deleted.

use super::BillingEngine;
use crate::error::{BillingError, FailureStage, Step, TaskBillingFailure, ValidationError};
use crate::models::{Invoice, LineItem};
use crate::services::metrics::{INVOICES_DELETED_TOTAL, ROLLBACK_FAILURES_TOTAL};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Billing removed from one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRollback {
    pub task_id: Uuid,
    pub percentage: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionReport {
    pub deleted_invoices: Vec<Uuid>,
    pub deleted_line_items: u64,
    pub detached_time_entries: u64,
    /// Sources of deleted consolidated invoices that are drafts again.
    pub reverted_sources: Vec<Uuid>,
    /// Set when reverting sources failed; deletion went ahead anyway.
    pub revert_error: Option<String>,
    pub rolled_back: Vec<TaskRollback>,
    pub rollback_failures: Vec<TaskBillingFailure>,
}

impl DeletionReport {
    /// True when every follow-up after the delete also went through.
    pub fn is_clean(&self) -> bool {
        self.revert_error.is_none() && self.rollback_failures.is_empty()
    }
}

/// Per-task totals contributed by `items`, in task id order.
pub(crate) fn aggregate_rollback(items: &[LineItem]) -> Vec<TaskRollback> {
    let mut totals: BTreeMap<Uuid, (Decimal, Decimal)> = BTreeMap::new();
    for item in items {
        if let Some(task_id) = item.task_id {
            let entry = totals.entry(task_id).or_default();
            entry.0 += item.billed_percentage.unwrap_or_default();
            entry.1 += item.amount;
        }
    }

    totals
        .into_iter()
        .map(|(task_id, (percentage, amount))| TaskRollback {
            task_id,
            percentage,
            amount,
        })
        .collect()
}

/// Refuse to delete a merged source unless its consolidated invoice goes too.
fn check_deletable(invoices: &[Invoice]) -> Result<(), ValidationError> {
    let batch: HashSet<Uuid> = invoices.iter().map(|inv| inv.invoice_id).collect();
    match invoices.iter().find(|inv| {
        inv.consolidated_into
            .is_some_and(|target| !batch.contains(&target))
    }) {
        Some(source) => Err(ValidationError::ConsolidatedSource {
            invoice_number: source.invoice_number.clone(),
        }),
        None => Ok(()),
    }
}

impl BillingEngine {
    /// Delete one invoice and roll its billing off the tasks it billed.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn delete_invoice(&self, invoice_id: Uuid) -> Result<DeletionReport, BillingError> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await
            .map_err(|e| BillingError::step(Step::Validation, e))?
            .ok_or(BillingError::InvoiceNotFound(invoice_id))?;

        self.delete_batch(vec![invoice]).await
    }

    /// Delete several invoices. Rollback is aggregated over the whole batch,
    /// so each task is updated once.
    #[instrument(skip(self, invoice_ids), fields(count = invoice_ids.len()))]
    pub async fn delete_invoices(
        &self,
        invoice_ids: &[Uuid],
    ) -> Result<DeletionReport, BillingError> {
        let mut ids: Vec<Uuid> = Vec::with_capacity(invoice_ids.len());
        for id in invoice_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        if ids.is_empty() {
            return Ok(DeletionReport::default());
        }

        let invoices = self
            .store
            .get_invoices(&ids)
            .await
            .map_err(|e| BillingError::step(Step::Validation, e))?;

        let found: HashSet<Uuid> = invoices.iter().map(|inv| inv.invoice_id).collect();
        let missing: Vec<Uuid> = ids.iter().filter(|id| !found.contains(id)).copied().collect();
        if !missing.is_empty() {
            return Err(ValidationError::InvoicesNotFound(missing).into());
        }

        self.delete_batch(invoices).await
    }

    async fn delete_batch(&self, invoices: Vec<Invoice>) -> Result<DeletionReport, BillingError> {
        check_deletable(&invoices).map_err(|e| {
            warn!(error = %e, "Refusing to delete invoice that is part of a consolidation");
            BillingError::from(e)
        })?;

        let ids: Vec<Uuid> = invoices.iter().map(|inv| inv.invoice_id).collect();
        let batch: HashSet<Uuid> = ids.iter().copied().collect();

        // Copied lines on a consolidated invoice don't carry billing of their
        // own; the sources do.
        let billing_ids: Vec<Uuid> = invoices
            .iter()
            .filter(|inv| !inv.is_consolidated())
            .map(|inv| inv.invoice_id)
            .collect();

        let rollback = if billing_ids.is_empty() {
            Vec::new()
        } else {
            let items = self
                .store
                .list_line_items(&billing_ids)
                .await
                .map_err(|e| {
                    error!(step = %Step::LineItems, error = %e, "Failed to read line items for rollback");
                    BillingError::step(Step::LineItems, e)
                })?;
            aggregate_rollback(&items)
        };

        let mut report = DeletionReport::default();

        let sources: Vec<Uuid> = invoices
            .iter()
            .flat_map(|inv| inv.consolidated_from.iter().copied())
            .filter(|id| !batch.contains(id))
            .collect();
        if !sources.is_empty() {
            match self.store.revert_consolidation(&sources).await {
                Ok(reverted) => {
                    if reverted < sources.len() as u64 {
                        warn!(
                            expected = sources.len(),
                            reverted = reverted,
                            "Some consolidation sources no longer exist"
                        );
                    }
                    info!(count = reverted, "Reverted consolidation sources to draft");
                    report.reverted_sources = sources;
                }
                Err(e) => {
                    error!(error = %e, "Failed to revert consolidation sources; deleting anyway");
                    ROLLBACK_FAILURES_TOTAL
                        .with_label_values(&["revert_sources"])
                        .inc();
                    report.revert_error = Some(e.to_string());
                }
            }
        }

        report.detached_time_entries =
            self.store.detach_time_entries(&ids).await.map_err(|e| {
                error!(step = %Step::TimeEntries, error = %e, "Failed to detach time entries");
                BillingError::step(Step::TimeEntries, e)
            })?;

        report.deleted_line_items = self.store.delete_line_items(&ids).await.map_err(|e| {
            error!(step = %Step::LineItems, error = %e, "Failed to delete line items");
            BillingError::step(Step::LineItems, e)
        })?;

        let deleted = self.store.delete_invoices(&ids).await.map_err(|e| {
            error!(step = %Step::Invoice, error = %e, "Failed to delete invoices");
            BillingError::step(Step::Invoice, e)
        })?;
        if deleted < ids.len() as u64 {
            warn!(
                expected = ids.len(),
                deleted = deleted,
                "Some invoices were already gone"
            );
        }
        report.deleted_invoices = ids;

        for invoice in &invoices {
            let kind = if invoice.is_consolidated() {
                "consolidated"
            } else {
                "regular"
            };
            INVOICES_DELETED_TOTAL.with_label_values(&[kind]).inc();
        }

        for task in rollback {
            match self
                .ledger
                .retreat(task.task_id, task.percentage, task.amount)
                .await
            {
                Ok(_) => report.rolled_back.push(task),
                Err(e) => {
                    error!(
                        task_id = %task.task_id,
                        percentage = %task.percentage,
                        amount = %task.amount,
                        error = %e,
                        "Ledger rollback failed; task billing needs manual repair"
                    );
                    ROLLBACK_FAILURES_TOTAL.with_label_values(&["ledger"]).inc();
                    report.rollback_failures.push(TaskBillingFailure {
                        task_id: task.task_id,
                        stage: FailureStage::Ledger,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            invoices = report.deleted_invoices.len(),
            line_items = report.deleted_line_items,
            tasks_rolled_back = report.rolled_back.len(),
            clean = report.is_clean(),
            "Invoices deleted"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingType, InvoiceStatus};
    use chrono::Utc;

    fn item(task_id: Option<Uuid>, pct: i64, amount: i64) -> LineItem {
        LineItem {
            line_item_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            task_id,
            description: "line".into(),
            quantity: Decimal::ONE,
            unit_price: Decimal::from(amount),
            amount: Decimal::from(amount),
            billed_percentage: task_id.map(|_| Decimal::from(pct)),
            billing_type: task_id.map(|_| BillingType::Percentage),
            task_total_budget: None,
            sort_order: 0,
            created_utc: Utc::now(),
        }
    }

    fn invoice(consolidated_into: Option<Uuid>) -> Invoice {
        Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: "INV-1".into(),
            client_id: Uuid::nil(),
            project_id: None,
            project_name: None,
            status: InvoiceStatus::Draft,
            subtotal: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total: Decimal::ZERO,
            consolidated_into,
            consolidated_from: vec![],
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn rollback_sums_lines_per_task() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let items = vec![
            item(Some(a), 10, 100),
            item(Some(b), 25, 400),
            item(Some(a), 15, 150),
            item(None, 0, 999),
        ];

        let rollback = aggregate_rollback(&items);

        assert_eq!(rollback.len(), 2);
        let for_a = rollback.iter().find(|r| r.task_id == a).unwrap();
        assert_eq!(for_a.percentage, Decimal::from(25));
        assert_eq!(for_a.amount, Decimal::from(250));
    }

    #[test]
    fn consolidated_source_alone_is_not_deletable() {
        let source = invoice(Some(Uuid::new_v4()));
        let err = check_deletable(&[source]).unwrap_err();
        assert!(matches!(err, ValidationError::ConsolidatedSource { .. }));
    }

    #[test]
    fn source_deletable_with_its_consolidated_invoice() {
        let mut consolidated = invoice(None);
        let source = invoice(Some(consolidated.invoice_id));
        consolidated.consolidated_from = vec![source.invoice_id];

        assert!(check_deletable(&[source, consolidated]).is_ok());
    }
}
