//! Domain models for task-billing-service.

mod billing_request;
mod invoice;
mod line_item;
mod task;
mod time_entry;

pub use billing_request::TaskBillingRequest;
pub use invoice::{Invoice, InvoiceStatus, NewInvoice};
pub use line_item::{max_money, BillingType, LineItem, NewLineItem};
pub(crate) use task::positive;
pub use task::{BilledState, BillingMode, BillingUnit, Task, TaskBilling};
pub use time_entry::TimeEntry;
