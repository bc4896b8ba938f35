//! Invoice lifecycle engine.
//!
//! Every operation here is a sequence of independent store calls. None of
//! them is atomic; each returns enough detail (the failed step, per-task
//! failures, warnings) to say exactly what state it left behind.

mod consolidation;
mod creation;
mod deletion;
pub mod ledger;
pub mod line_items;
pub mod synthesis;

pub use consolidation::{validate_sources, ConsolidationOutcome};
pub use creation::{CreateInvoiceInput, CreationOutcome};
pub use deletion::{DeletionReport, TaskRollback};
pub use ledger::TaskLedger;

use crate::config::EngineSettings;
use crate::services::{BillingStore, InvoiceNumbering};
use rust_decimal::Decimal;
use std::sync::Arc;

#[derive(Clone)]
pub struct BillingEngine {
    store: Arc<dyn BillingStore>,
    numbering: Arc<dyn InvoiceNumbering>,
    ledger: TaskLedger,
    settings: EngineSettings,
}

impl BillingEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        numbering: Arc<dyn InvoiceNumbering>,
        settings: EngineSettings,
    ) -> Self {
        let ledger = TaskLedger::new(
            store.clone(),
            settings.ledger_update_attempts,
            settings.enforce_budget_ceiling,
        );
        Self {
            store,
            numbering,
            ledger,
            settings,
        }
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn BillingStore> {
        &self.store
    }

    fn reconciles(&self, expected: Decimal, actual: Decimal) -> bool {
        (expected - actual).abs() <= self.settings.reconciliation_tolerance
    }
}
