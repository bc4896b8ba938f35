//! Store decorator applying the bounded-retry policy.
//!
//! Reads and idempotent writes are retried on transient errors. Inserts and
//! conditional billing updates get a single timed attempt: replaying them
//! after an ambiguous failure could write twice.

use crate::models::{Invoice, LineItem, NewInvoice, NewLineItem, Task, TaskBilling};
use crate::services::store::BillingStore;
use async_trait::async_trait;
use service_core::error::AppError;
use service_core::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use uuid::Uuid;

pub struct RetryingStore {
    inner: Arc<dyn BillingStore>,
    policy: RetryPolicy,
    once: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn BillingStore>, policy: RetryPolicy) -> Self {
        let once = policy.single_attempt();
        Self {
            inner,
            policy,
            once,
        }
    }
}

#[async_trait]
impl BillingStore for RetryingStore {
    async fn health_check(&self) -> Result<(), AppError> {
        retry_with_backoff(&self.once, "health_check", || self.inner.health_check()).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>, AppError> {
        retry_with_backoff(&self.policy, "get_task", || self.inner.get_task(task_id)).await
    }

    async fn list_billed_tasks(&self, project_id: Uuid) -> Result<Vec<Task>, AppError> {
        retry_with_backoff(&self.policy, "list_billed_tasks", || {
            self.inner.list_billed_tasks(project_id)
        })
        .await
    }

    async fn update_task_billing(
        &self,
        task_id: Uuid,
        expected: &TaskBilling,
        next: &TaskBilling,
    ) -> Result<bool, AppError> {
        retry_with_backoff(&self.once, "update_task_billing", || {
            self.inner.update_task_billing(task_id, expected, next)
        })
        .await
    }

    async fn create_invoice(&self, input: &NewInvoice) -> Result<Invoice, AppError> {
        retry_with_backoff(&self.once, "create_invoice", || {
            self.inner.create_invoice(input)
        })
        .await
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        retry_with_backoff(&self.policy, "get_invoice", || {
            self.inner.get_invoice(invoice_id)
        })
        .await
    }

    async fn get_invoices(&self, invoice_ids: &[Uuid]) -> Result<Vec<Invoice>, AppError> {
        retry_with_backoff(&self.policy, "get_invoices", || {
            self.inner.get_invoices(invoice_ids)
        })
        .await
    }

    async fn mark_consolidated(
        &self,
        invoice_ids: &[Uuid],
        consolidated_into: Uuid,
    ) -> Result<u64, AppError> {
        retry_with_backoff(&self.policy, "mark_consolidated", || {
            self.inner.mark_consolidated(invoice_ids, consolidated_into)
        })
        .await
    }

    async fn revert_consolidation(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        retry_with_backoff(&self.policy, "revert_consolidation", || {
            self.inner.revert_consolidation(invoice_ids)
        })
        .await
    }

    async fn delete_invoices(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        retry_with_backoff(&self.policy, "delete_invoices", || {
            self.inner.delete_invoices(invoice_ids)
        })
        .await
    }

    async fn insert_line_item(&self, input: &NewLineItem) -> Result<LineItem, AppError> {
        retry_with_backoff(&self.once, "insert_line_item", || {
            self.inner.insert_line_item(input)
        })
        .await
    }

    async fn insert_line_items(&self, inputs: &[NewLineItem]) -> Result<Vec<LineItem>, AppError> {
        retry_with_backoff(&self.once, "insert_line_items", || {
            self.inner.insert_line_items(inputs)
        })
        .await
    }

    async fn list_line_items(&self, invoice_ids: &[Uuid]) -> Result<Vec<LineItem>, AppError> {
        retry_with_backoff(&self.policy, "list_line_items", || {
            self.inner.list_line_items(invoice_ids)
        })
        .await
    }

    async fn count_line_items(&self, invoice_id: Uuid) -> Result<i64, AppError> {
        retry_with_backoff(&self.policy, "count_line_items", || {
            self.inner.count_line_items(invoice_id)
        })
        .await
    }

    async fn delete_line_items(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        retry_with_backoff(&self.policy, "delete_line_items", || {
            self.inner.delete_line_items(invoice_ids)
        })
        .await
    }

    async fn detach_time_entries(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        retry_with_backoff(&self.policy, "detach_time_entries", || {
            self.inner.detach_time_entries(invoice_ids)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryStore;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(1),
            add_jitter: false,
        }
    }

    #[tokio::test]
    async fn persistent_failures_surface_after_budget() {
        let memory = Arc::new(MemoryStore::new());
        memory.fail_operation("get_invoice").await;
        let store = RetryingStore::new(memory.clone(), policy());

        let result = store.get_invoice(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn passes_through_successful_calls() {
        let memory = Arc::new(MemoryStore::new());
        let store = RetryingStore::new(memory, policy());

        assert!(store.get_invoice(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(store.count_line_items(Uuid::new_v4()).await.unwrap(), 0);
    }
}
