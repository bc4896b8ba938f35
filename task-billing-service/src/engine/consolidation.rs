//! Merging several draft invoices of one client into a single invoice.
//!
//! All reads happen before anything is written. Then the consolidated
//! invoice is created, its lines inserted, and finally the sources are
//! pointed at it. Sources are marked last so a failure part way never hides
//! them behind an invoice that lacks their lines.

use super::synthesis::{needs_synthesis, synthesize_for_invoice};
use super::BillingEngine;
use crate::error::{BillingError, ReconciliationWarning, Step, ValidationError};
use crate::models::{Invoice, InvoiceStatus, LineItem, NewInvoice, NewLineItem, Task};
use crate::services::metrics::{
    CONSOLIDATIONS_TOTAL, RECONCILIATION_WARNINGS_TOTAL, SYNTHESIZED_LINE_ITEMS_TOTAL,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationOutcome {
    pub consolidated_invoice: Invoice,
    pub line_items: Vec<LineItem>,
    pub copied_line_items: usize,
    pub synthesized_line_items: usize,
    pub reconciliation: Option<ReconciliationWarning>,
    /// Sources not confirmed to point at the consolidated invoice.
    pub unmarked_sources: Vec<Uuid>,
}

/// Check `found` (the invoices that resolved) against the `requested` ids.
pub fn validate_sources(requested: &[Uuid], found: &[Invoice]) -> Result<(), ValidationError> {
    if requested.len() < 2 {
        return Err(ValidationError::TooFewInvoices);
    }

    let present: HashSet<Uuid> = found.iter().map(|inv| inv.invoice_id).collect();
    let missing: Vec<Uuid> = requested
        .iter()
        .filter(|id| !present.contains(id))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(ValidationError::InvoicesNotFound(missing));
    }

    let client_id = found[0].client_id;
    if found.iter().any(|inv| inv.client_id != client_id) {
        return Err(ValidationError::MixedClients);
    }

    for invoice in found {
        if invoice.consolidated_into.is_some() {
            return Err(ValidationError::AlreadyConsolidated {
                invoice_number: invoice.invoice_number.clone(),
            });
        }
        if invoice.is_consolidated() {
            return Err(ValidationError::NestedConsolidation {
                invoice_number: invoice.invoice_number.clone(),
            });
        }
        if invoice.status != InvoiceStatus::Draft {
            return Err(ValidationError::NotDraft {
                invoice_number: invoice.invoice_number.clone(),
                status: invoice.status,
            });
        }
    }

    Ok(())
}

fn shared<T: PartialEq + Clone>(values: impl IntoIterator<Item = Option<T>>) -> Option<T> {
    let mut values = values.into_iter();
    let first = values.next()??;
    values
        .all(|value| value.as_ref() == Some(&first))
        .then_some(first)
}

/// Header for the merged invoice: summed amounts, project kept only if all
/// sources agree on it.
fn consolidated_header(sources: &[Invoice], invoice_number: String) -> NewInvoice {
    let subtotal: Decimal = sources.iter().map(|inv| inv.subtotal).sum();
    let tax_amount: Decimal = sources.iter().map(|inv| inv.tax_amount).sum();
    let total: Decimal = sources.iter().map(|inv| inv.total).sum();

    let tax_rate = shared(sources.iter().map(|inv| Some(inv.tax_rate))).unwrap_or_else(|| {
        if subtotal > Decimal::ZERO {
            (tax_amount * Decimal::ONE_HUNDRED / subtotal).round_dp(2)
        } else {
            Decimal::ZERO
        }
    });

    NewInvoice {
        invoice_number,
        client_id: sources[0].client_id,
        project_id: shared(sources.iter().map(|inv| inv.project_id)),
        project_name: shared(sources.iter().map(|inv| inv.project_name.clone())),
        status: InvoiceStatus::Draft,
        subtotal,
        tax_rate,
        tax_amount,
        total,
        consolidated_from: sources.iter().map(|inv| inv.invoice_id).collect(),
    }
}

impl BillingEngine {
    #[instrument(skip(self, invoice_ids), fields(count = invoice_ids.len()))]
    pub async fn consolidate_invoices(
        &self,
        invoice_ids: &[Uuid],
    ) -> Result<ConsolidationOutcome, BillingError> {
        let result = self.consolidate(invoice_ids).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(BillingError::Validation(_)) => "rejected",
            Err(_) => "failed",
        };
        CONSOLIDATIONS_TOTAL.with_label_values(&[outcome]).inc();
        result
    }

    async fn consolidate(&self, invoice_ids: &[Uuid]) -> Result<ConsolidationOutcome, BillingError> {
        let mut ids: Vec<Uuid> = Vec::with_capacity(invoice_ids.len());
        for id in invoice_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }

        let sources = if ids.len() < 2 {
            Vec::new()
        } else {
            self.store
                .get_invoices(&ids)
                .await
                .map_err(|e| BillingError::step(Step::Validation, e))?
        };

        validate_sources(&ids, &sources).map_err(|e| {
            warn!(error = %e, "Consolidation rejected");
            BillingError::from(e)
        })?;

        let source_items = self.store.list_line_items(&ids).await.map_err(|e| {
            error!(step = %Step::SourceLineItems, error = %e, "Failed to read source line items");
            BillingError::step(Step::SourceLineItems, e)
        })?;

        let mut items_by_invoice: HashMap<Uuid, Vec<&LineItem>> = HashMap::new();
        for item in &source_items {
            items_by_invoice.entry(item.invoice_id).or_default().push(item);
        }

        // Billed tasks for each project whose invoice lost its lines.
        let mut billed_tasks: HashMap<Uuid, Vec<Task>> = HashMap::new();
        for source in &sources {
            let count = items_by_invoice.get(&source.invoice_id).map_or(0, Vec::len);
            if !needs_synthesis(source, count) {
                continue;
            }
            if let Some(project_id) = source.project_id {
                if billed_tasks.contains_key(&project_id) {
                    continue;
                }
                match self.store.list_billed_tasks(project_id).await {
                    Ok(tasks) => {
                        billed_tasks.insert(project_id, tasks);
                    }
                    Err(e) => {
                        warn!(
                            invoice_id = %source.invoice_id,
                            project_id = %project_id,
                            error = %e,
                            "Could not load billed tasks; using a single line for the invoice"
                        );
                    }
                }
            }
        }

        let header = consolidated_header(&sources, self.numbering.consolidated_number());
        let consolidated = self.store.create_invoice(&header).await.map_err(|e| {
            error!(step = %Step::Invoice, error = %e, "Failed to create consolidated invoice");
            BillingError::step(Step::Invoice, e)
        })?;

        info!(
            invoice_id = %consolidated.invoice_id,
            invoice_number = %consolidated.invoice_number,
            total = %consolidated.total,
            "Consolidated invoice created"
        );

        let mut new_items: Vec<NewLineItem> = Vec::new();
        let mut copied = 0;
        let mut synthesized = 0;

        for source in &sources {
            let label = source.provenance_label();
            let existing = items_by_invoice
                .get(&source.invoice_id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            if needs_synthesis(source, existing.len()) {
                let tasks = source
                    .project_id
                    .and_then(|project_id| billed_tasks.get(&project_id))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let result = synthesize_for_invoice(
                    source,
                    tasks,
                    consolidated.invoice_id,
                    new_items.len() as i32,
                    self.settings.reconciliation_tolerance,
                );

                info!(
                    source_invoice_id = %source.invoice_id,
                    kind = result.kind.as_str(),
                    count = result.items.len(),
                    "Synthesized line items for invoice without any"
                );
                SYNTHESIZED_LINE_ITEMS_TOTAL
                    .with_label_values(&[result.kind.as_str()])
                    .inc_by(result.items.len() as f64);
                synthesized += result.items.len();
                new_items.extend(result.items);
            } else {
                for item in existing {
                    let sort_order = new_items.len() as i32;
                    new_items.push(NewLineItem::copied_from(
                        item,
                        consolidated.invoice_id,
                        label,
                        sort_order,
                    ));
                    copied += 1;
                }
            }
        }

        let line_items = if new_items.is_empty() {
            Vec::new()
        } else {
            self.store
                .insert_line_items(&new_items)
                .await
                .map_err(|e| {
                    error!(
                        invoice_id = %consolidated.invoice_id,
                        step = %Step::InsertLineItems,
                        error = %e,
                        "Failed to insert consolidated line items; sources left untouched"
                    );
                    BillingError::step(
                        Step::InsertLineItems,
                        format!(
                            "consolidated invoice {} has no line items: {}",
                            consolidated.invoice_id, e
                        ),
                    )
                })?
        };

        let actual: Decimal = line_items.iter().map(|item| item.amount).sum();
        let reconciliation = if self.reconciles(consolidated.total, actual) {
            None
        } else {
            let warning = ReconciliationWarning {
                expected: consolidated.total,
                actual,
            };
            warn!(
                invoice_id = %consolidated.invoice_id,
                %warning,
                "Consolidated invoice does not reconcile"
            );
            RECONCILIATION_WARNINGS_TOTAL
                .with_label_values(&["consolidate"])
                .inc();
            Some(warning)
        };

        let marked = self
            .store
            .mark_consolidated(&ids, consolidated.invoice_id)
            .await
            .map_err(|e| {
                error!(
                    invoice_id = %consolidated.invoice_id,
                    step = %Step::MarkSources,
                    error = %e,
                    "Failed to mark source invoices"
                );
                BillingError::step(
                    Step::MarkSources,
                    format!(
                        "consolidated invoice {} was created but its sources were not marked: {}",
                        consolidated.invoice_id, e
                    ),
                )
            })?;

        let mut unmarked_sources = Vec::new();
        if marked < ids.len() as u64 {
            warn!(
                invoice_id = %consolidated.invoice_id,
                expected = ids.len(),
                marked = marked,
                "Some sources changed during consolidation and were not marked"
            );
            unmarked_sources = match self.store.get_invoices(&ids).await {
                Ok(after) => {
                    let confirmed: HashSet<Uuid> = after
                        .iter()
                        .filter(|inv| inv.consolidated_into == Some(consolidated.invoice_id))
                        .map(|inv| inv.invoice_id)
                        .collect();
                    ids.iter()
                        .filter(|id| !confirmed.contains(id))
                        .copied()
                        .collect()
                }
                Err(e) => {
                    // Unknown counts as unmarked.
                    error!(
                        invoice_id = %consolidated.invoice_id,
                        step = %Step::MarkSources,
                        error = %e,
                        "Could not re-read sources after a partial mark"
                    );
                    ids.clone()
                }
            };
        }

        info!(
            invoice_id = %consolidated.invoice_id,
            sources = ids.len(),
            copied = copied,
            synthesized = synthesized,
            "Invoices consolidated"
        );

        Ok(ConsolidationOutcome {
            consolidated_invoice: consolidated,
            line_items,
            copied_line_items: copied,
            synthesized_line_items: synthesized,
            reconciliation,
            unmarked_sources,
        })
    }
}
