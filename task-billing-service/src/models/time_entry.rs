//! Time entry model. Only the invoice link matters to billing.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TimeEntry {
    pub time_entry_id: Uuid,
    pub task_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub hours: Decimal,
    pub entry_date: NaiveDate,
}
