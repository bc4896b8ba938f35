//! Services module for task-billing-service.

pub mod database;
pub mod memory;
pub mod metrics;
pub mod numbering;
pub mod retrying;
pub mod store;

pub use database::Database;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use numbering::{InvoiceNumbering, SequentialNumbering};
pub use retrying::RetryingStore;
pub use store::BillingStore;
