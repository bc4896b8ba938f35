//! Per-task cumulative billing state.
//!
//! All writes are read-compute-conditional-write cycles against the task row.
//! A lost race re-reads and tries again, up to a fixed number of attempts,
//! so two invoices billing the same task cannot silently overwrite each other.

use crate::error::{BillingError, ValidationError};
use crate::models::{BilledState, BillingMode, TaskBilling};
use crate::services::BillingStore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const FULL: Decimal = Decimal::ONE_HUNDRED;

/// Result of applying `advance` to a billing snapshot.
pub fn advanced(
    task_id: Uuid,
    current: &TaskBilling,
    delta_percentage: Decimal,
    delta_amount: Decimal,
    requested: BillingMode,
    enforce_ceiling: bool,
) -> Result<TaskBilling, BillingError> {
    let mode = current
        .mode
        .lock_to(requested)
        .ok_or(BillingError::ModeConflict {
            task_id,
            current: current.mode,
            requested,
        })?;

    let out_of_range = || {
        BillingError::from(ValidationError::InvalidBillingRequest {
            task_id,
            reason: "billed totals are out of range".to_string(),
        })
    };

    let billed_percentage = current
        .billed_percentage
        .checked_add(delta_percentage)
        .ok_or_else(out_of_range)?;
    let billed_amount = current
        .billed_amount
        .checked_add(delta_amount)
        .ok_or_else(out_of_range)?;
    if enforce_ceiling && billed_percentage > FULL {
        return Err(BillingError::BudgetExceeded {
            task_id,
            attempted: billed_percentage,
        });
    }

    Ok(TaskBilling {
        mode,
        billed_percentage,
        billed_amount,
    })
}

/// Result of applying `retreat`: subtract, clamped at zero. The mode stays
/// locked even when the task is rolled back to nothing billed.
pub fn retreated(
    current: &TaskBilling,
    delta_percentage: Decimal,
    delta_amount: Decimal,
) -> TaskBilling {
    TaskBilling {
        mode: current.mode,
        billed_percentage: (current.billed_percentage - delta_percentage).max(Decimal::ZERO),
        billed_amount: (current.billed_amount - delta_amount).max(Decimal::ZERO),
    }
}

#[derive(Clone)]
pub struct TaskLedger {
    store: Arc<dyn BillingStore>,
    max_attempts: u32,
    enforce_ceiling: bool,
}

impl TaskLedger {
    pub fn new(store: Arc<dyn BillingStore>, max_attempts: u32, enforce_ceiling: bool) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            enforce_ceiling,
        }
    }

    /// Percentage and amount billed so far on a task.
    #[instrument(skip(self))]
    pub async fn current_billed(&self, task_id: Uuid) -> Result<BilledState, BillingError> {
        Ok(self.snapshot(task_id).await?.into())
    }

    /// Add billing to a task, locking its mode on first use.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn advance(
        &self,
        task_id: Uuid,
        delta_percentage: Decimal,
        delta_amount: Decimal,
        mode: BillingMode,
    ) -> Result<TaskBilling, BillingError> {
        if delta_percentage < Decimal::ZERO || delta_amount < Decimal::ZERO {
            return Err(ValidationError::InvalidBillingRequest {
                task_id,
                reason: "billing deltas cannot be negative".to_string(),
            }
            .into());
        }

        let enforce_ceiling = self.enforce_ceiling;
        self.update(task_id, |current| {
            advanced(
                task_id,
                current,
                delta_percentage,
                delta_amount,
                mode,
                enforce_ceiling,
            )
        })
        .await
    }

    /// Remove billing from a task, clamping at zero. Only store failures
    /// can make this fail.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn retreat(
        &self,
        task_id: Uuid,
        delta_percentage: Decimal,
        delta_amount: Decimal,
    ) -> Result<TaskBilling, BillingError> {
        self.update(task_id, |current| {
            let next = retreated(current, delta_percentage, delta_amount);
            if current.billed_percentage < delta_percentage || current.billed_amount < delta_amount
            {
                warn!(
                    task_id = %task_id,
                    billed_percentage = %current.billed_percentage,
                    delta_percentage = %delta_percentage,
                    billed_amount = %current.billed_amount,
                    delta_amount = %delta_amount,
                    "Rollback exceeds billed state; clamping at zero"
                );
            }
            Ok(next)
        })
        .await
    }

    /// Lock a task into time billing, as happens on its first time entry.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn lock_time_mode(&self, task_id: Uuid) -> Result<TaskBilling, BillingError> {
        self.update(task_id, |current| {
            advanced(
                task_id,
                current,
                Decimal::ZERO,
                Decimal::ZERO,
                BillingMode::Time,
                false,
            )
        })
        .await
    }

    async fn snapshot(&self, task_id: Uuid) -> Result<TaskBilling, BillingError> {
        self.store
            .get_task(task_id)
            .await?
            .map(|task| task.billing())
            .ok_or(BillingError::TaskNotFound(task_id))
    }

    async fn update<F>(&self, task_id: Uuid, compute: F) -> Result<TaskBilling, BillingError>
    where
        F: Fn(&TaskBilling) -> Result<TaskBilling, BillingError>,
    {
        for attempt in 1..=self.max_attempts {
            let current = self.snapshot(task_id).await?;
            let next = compute(&current)?;
            if next == current {
                return Ok(next);
            }

            if self
                .store
                .update_task_billing(task_id, &current, &next)
                .await?
            {
                debug!(
                    task_id = %task_id,
                    mode = %next.mode,
                    billed_percentage = %next.billed_percentage,
                    billed_amount = %next.billed_amount,
                    "Task billing updated"
                );
                return Ok(next);
            }

            warn!(task_id = %task_id, attempt = attempt, "Task billing changed concurrently, retrying");
        }

        Err(BillingError::ConcurrentModification {
            task_id,
            attempts: self.max_attempts,
        })
    }
}
