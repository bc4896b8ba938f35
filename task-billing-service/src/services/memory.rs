//! In-process store used by tests and the `memory` backend.
//!
//! Behaves like the Postgres store row for row, plus fault injection so the
//! partial-failure paths of the engine can be exercised deterministically.

use crate::models::{
    Invoice, InvoiceStatus, LineItem, NewInvoice, NewLineItem, Task, TaskBilling, TimeEntry,
};
use crate::services::store::BillingStore;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    tasks: HashMap<Uuid, Task>,
    invoices: BTreeMap<Uuid, Invoice>,
    line_items: Vec<LineItem>,
    time_entries: HashMap<Uuid, TimeEntry>,
}

#[derive(Default)]
struct Faults {
    line_item_tasks: HashSet<Uuid>,
    operations: HashSet<&'static str>,
    delayed_operations: HashMap<&'static str, u32>,
    contended_tasks: HashMap<Uuid, u32>,
    held_invoices: HashSet<Uuid>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    faults: RwLock<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_task(&self, task: Task) {
        self.state.write().await.tasks.insert(task.task_id, task);
    }

    pub async fn insert_time_entry(&self, entry: TimeEntry) {
        self.state
            .write()
            .await
            .time_entries
            .insert(entry.time_entry_id, entry);
    }

    pub async fn time_entry(&self, time_entry_id: Uuid) -> Option<TimeEntry> {
        self.state
            .read()
            .await
            .time_entries
            .get(&time_entry_id)
            .cloned()
    }

    pub async fn invoice_count(&self) -> usize {
        self.state.read().await.invoices.len()
    }

    /// Make every line-item insert referencing `task_id` fail.
    pub async fn fail_line_items_for(&self, task_id: Uuid) {
        self.faults.write().await.line_item_tasks.insert(task_id);
    }

    /// Make the named store operation fail with a database error until cleared.
    pub async fn fail_operation(&self, operation: &'static str) {
        self.faults.write().await.operations.insert(operation);
    }

    /// Let the named operation succeed `calls` more times, then fail it.
    pub async fn fail_operation_after(&self, operation: &'static str, calls: u32) {
        self.faults
            .write()
            .await
            .delayed_operations
            .insert(operation, calls);
    }

    /// Leave `invoice_id` alone when sources are marked, as if another
    /// writer moved it out of draft first.
    pub async fn hold_from_marking(&self, invoice_id: Uuid) {
        self.faults.write().await.held_invoices.insert(invoice_id);
    }

    /// Lose the next `times` conditional billing writes on `task_id`, as if
    /// another writer got there first each time.
    pub async fn contend_billing(&self, task_id: Uuid, times: u32) {
        self.faults
            .write()
            .await
            .contended_tasks
            .insert(task_id, times);
    }

    pub async fn clear_faults(&self) {
        let mut faults = self.faults.write().await;
        faults.line_item_tasks.clear();
        faults.operations.clear();
        faults.delayed_operations.clear();
        faults.contended_tasks.clear();
        faults.held_invoices.clear();
    }

    async fn check(&self, operation: &'static str) -> Result<(), AppError> {
        let mut guard = self.faults.write().await;
        let faults = &mut *guard;
        let failing = match faults.delayed_operations.get_mut(operation) {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => faults.operations.contains(operation),
        };
        if failing {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }

    async fn check_line_item(&self, input: &NewLineItem) -> Result<(), AppError> {
        let faults = self.faults.read().await;
        match input.task_id {
            Some(task_id) if faults.line_item_tasks.contains(&task_id) => {
                Err(AppError::DatabaseError(anyhow::anyhow!(
                    "injected line item failure for task {}",
                    task_id
                )))
            }
            _ => Ok(()),
        }
    }
}

fn materialize(input: &NewLineItem) -> LineItem {
    LineItem {
        line_item_id: Uuid::new_v4(),
        invoice_id: input.invoice_id,
        task_id: input.task_id,
        description: input.description.clone(),
        quantity: input.quantity,
        unit_price: input.unit_price,
        amount: input.amount,
        billed_percentage: input.billed_percentage,
        billing_type: input.billing_type,
        task_total_budget: input.task_total_budget,
        sort_order: input.sort_order,
        created_utc: Utc::now(),
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.check("health_check").await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>, AppError> {
        self.check("get_task").await?;
        Ok(self.state.read().await.tasks.get(&task_id).cloned())
    }

    async fn list_billed_tasks(&self, project_id: Uuid) -> Result<Vec<Task>, AppError> {
        self.check("list_billed_tasks").await?;
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.project_id == project_id && t.billed_amount > Decimal::ZERO)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name).then(a.task_id.cmp(&b.task_id)));
        Ok(tasks)
    }

    async fn update_task_billing(
        &self,
        task_id: Uuid,
        expected: &TaskBilling,
        next: &TaskBilling,
    ) -> Result<bool, AppError> {
        self.check("update_task_billing").await?;
        {
            let mut faults = self.faults.write().await;
            if let Some(remaining) = faults.contended_tasks.get_mut(&task_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(false);
                }
            }
        }
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&task_id) {
            Some(task) if task.billing() == *expected => {
                task.billing_mode = next.mode;
                task.billed_percentage = next.billed_percentage;
                task.billed_amount = next.billed_amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_invoice(&self, input: &NewInvoice) -> Result<Invoice, AppError> {
        self.check("create_invoice").await?;
        let mut state = self.state.write().await;
        if state
            .invoices
            .values()
            .any(|inv| inv.invoice_number == input.invoice_number)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice number '{}' is already taken",
                input.invoice_number
            )));
        }

        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            invoice_number: input.invoice_number.clone(),
            client_id: input.client_id,
            project_id: input.project_id,
            project_name: input.project_name.clone(),
            status: input.status,
            subtotal: input.subtotal,
            tax_rate: input.tax_rate,
            tax_amount: input.tax_amount,
            total: input.total,
            consolidated_into: None,
            consolidated_from: input.consolidated_from.clone(),
            created_utc: Utc::now(),
        };
        state.invoices.insert(invoice.invoice_id, invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        self.check("get_invoice").await?;
        Ok(self.state.read().await.invoices.get(&invoice_id).cloned())
    }

    async fn get_invoices(&self, invoice_ids: &[Uuid]) -> Result<Vec<Invoice>, AppError> {
        self.check("get_invoices").await?;
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = invoice_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| state.invoices.get(id).cloned())
            .collect();
        invoices.sort_by_key(|inv| (inv.created_utc, inv.invoice_id));
        Ok(invoices)
    }

    async fn mark_consolidated(
        &self,
        invoice_ids: &[Uuid],
        consolidated_into: Uuid,
    ) -> Result<u64, AppError> {
        self.check("mark_consolidated").await?;
        let held = self.faults.read().await.held_invoices.clone();
        let mut state = self.state.write().await;
        let mut marked = 0;
        for id in invoice_ids.iter().filter(|id| !held.contains(id)) {
            match state.invoices.get_mut(id) {
                Some(inv) if inv.status == InvoiceStatus::Draft && inv.consolidated_into.is_none() => {
                    inv.consolidated_into = Some(consolidated_into);
                    inv.status = InvoiceStatus::Consolidated;
                    marked += 1;
                }
                _ => {}
            }
        }
        Ok(marked)
    }

    async fn revert_consolidation(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        self.check("revert_consolidation").await?;
        let mut state = self.state.write().await;
        let mut reverted = 0;
        for id in invoice_ids {
            if let Some(inv) = state.invoices.get_mut(id) {
                inv.consolidated_into = None;
                inv.status = InvoiceStatus::Draft;
                reverted += 1;
            }
        }
        Ok(reverted)
    }

    async fn delete_invoices(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        self.check("delete_invoices").await?;
        let mut state = self.state.write().await;
        let mut deleted = 0;
        for id in invoice_ids {
            if state.invoices.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn insert_line_item(&self, input: &NewLineItem) -> Result<LineItem, AppError> {
        self.check("insert_line_item").await?;
        self.check_line_item(input).await?;
        let item = materialize(input);
        self.state.write().await.line_items.push(item.clone());
        Ok(item)
    }

    async fn insert_line_items(&self, inputs: &[NewLineItem]) -> Result<Vec<LineItem>, AppError> {
        self.check("insert_line_items").await?;
        for input in inputs {
            self.check_line_item(input).await?;
        }
        let items: Vec<LineItem> = inputs.iter().map(materialize).collect();
        self.state
            .write()
            .await
            .line_items
            .extend(items.iter().cloned());
        Ok(items)
    }

    async fn list_line_items(&self, invoice_ids: &[Uuid]) -> Result<Vec<LineItem>, AppError> {
        self.check("list_line_items").await?;
        let wanted: HashSet<&Uuid> = invoice_ids.iter().collect();
        let mut items: Vec<LineItem> = self
            .state
            .read()
            .await
            .line_items
            .iter()
            .filter(|item| wanted.contains(&item.invoice_id))
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.invoice_id, item.sort_order, item.created_utc));
        Ok(items)
    }

    async fn count_line_items(&self, invoice_id: Uuid) -> Result<i64, AppError> {
        self.check("count_line_items").await?;
        let count = self
            .state
            .read()
            .await
            .line_items
            .iter()
            .filter(|item| item.invoice_id == invoice_id)
            .count();
        Ok(count as i64)
    }

    async fn delete_line_items(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        self.check("delete_line_items").await?;
        let wanted: HashSet<&Uuid> = invoice_ids.iter().collect();
        let mut state = self.state.write().await;
        let before = state.line_items.len();
        state
            .line_items
            .retain(|item| !wanted.contains(&item.invoice_id));
        Ok((before - state.line_items.len()) as u64)
    }

    async fn detach_time_entries(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        self.check("detach_time_entries").await?;
        let wanted: HashSet<&Uuid> = invoice_ids.iter().collect();
        let mut state = self.state.write().await;
        let mut detached = 0;
        for entry in state.time_entries.values_mut() {
            if entry.invoice_id.as_ref().is_some_and(|id| wanted.contains(id)) {
                entry.invoice_id = None;
                detached += 1;
            }
        }
        Ok(detached)
    }
}
