//! Human-readable invoice reference numbers.

use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Source of invoice numbers. Uniqueness is the implementor's concern; the
/// store rejects duplicates with a conflict.
pub trait InvoiceNumbering: Send + Sync {
    fn next_number(&self) -> String;

    fn consolidated_number(&self) -> String;
}

/// `INV-YYYYMMDD-NNNN` / `CON-YYYYMMDD-NNNN` from a process-local counter.
pub struct SequentialNumbering {
    counter: AtomicU32,
}

impl SequentialNumbering {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            counter: AtomicU32::new(first),
        }
    }

    fn format(&self, prefix: &str) -> String {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}-{:04}", prefix, Utc::now().format("%Y%m%d"), seq)
    }
}

impl Default for SequentialNumbering {
    fn default() -> Self {
        Self::new()
    }
}

impl InvoiceNumbering for SequentialNumbering {
    fn next_number(&self) -> String {
        self.format("INV")
    }

    fn consolidated_number(&self) -> String {
        self.format("CON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_share_one_sequence() {
        let numbering = SequentialNumbering::starting_at(41);
        let first = numbering.next_number();
        let second = numbering.consolidated_number();

        assert!(first.starts_with("INV-"));
        assert!(first.ends_with("-0041"));
        assert!(second.starts_with("CON-"));
        assert!(second.ends_with("-0042"));
    }
}
