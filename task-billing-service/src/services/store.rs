//! Row-level access to the remote store.
//!
//! Every method is an independent round trip; nothing here spans more than
//! one statement, so callers must treat a sequence of calls as non-atomic.

use crate::models::{Invoice, LineItem, NewInvoice, NewLineItem, Task, TaskBilling};
use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // tasks
    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>, AppError>;

    /// Tasks under a project with `billed_amount > 0`, ordered by name.
    async fn list_billed_tasks(&self, project_id: Uuid) -> Result<Vec<Task>, AppError>;

    /// Write `next` only if the row still holds `expected`. Returns false when
    /// another writer got there first (or the task is gone).
    async fn update_task_billing(
        &self,
        task_id: Uuid,
        expected: &TaskBilling,
        next: &TaskBilling,
    ) -> Result<bool, AppError>;

    // invoices
    async fn create_invoice(&self, input: &NewInvoice) -> Result<Invoice, AppError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Invoices among `invoice_ids` that exist; missing ids are simply absent.
    async fn get_invoices(&self, invoice_ids: &[Uuid]) -> Result<Vec<Invoice>, AppError>;

    /// Point drafts at `consolidated_into` and flip them to consolidated, in one
    /// statement. Rows that are no longer unconsolidated drafts are skipped.
    async fn mark_consolidated(
        &self,
        invoice_ids: &[Uuid],
        consolidated_into: Uuid,
    ) -> Result<u64, AppError>;

    /// Clear `consolidated_into` and reset status to draft.
    async fn revert_consolidation(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError>;

    async fn delete_invoices(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError>;

    // line items
    async fn insert_line_item(&self, input: &NewLineItem) -> Result<LineItem, AppError>;

    async fn insert_line_items(&self, inputs: &[NewLineItem]) -> Result<Vec<LineItem>, AppError>;

    /// Line items for the given invoices ordered by invoice, then sort order.
    async fn list_line_items(&self, invoice_ids: &[Uuid]) -> Result<Vec<LineItem>, AppError>;

    async fn count_line_items(&self, invoice_id: Uuid) -> Result<i64, AppError>;

    async fn delete_line_items(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError>;

    // time entries
    /// Clear `invoice_id` on time entries pointing at these invoices.
    async fn detach_time_entries(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError>;
}
