pub mod health;
pub mod invoices;
pub mod tasks;

pub use health::{health_check, metrics_handler, readiness_check};
pub use invoices::{
    bulk_delete_invoices, consolidate_invoices, create_invoice, delete_invoice, get_invoice,
};
pub use tasks::{get_task_billing, lock_time_mode};
