//! Prometheus metrics for task-billing-service.
//!
//! Billing counters live in the `prometheus` registry. HTTP request metrics
//! from the shared middleware go through the `metrics` facade and are
//! rendered by the recorder installed here; `/metrics` serves both.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

/// Handle to the recorder behind the HTTP request metrics.
static HTTP_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Invoices created, by outcome (complete, partial, fallback).
pub static INVOICES_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "task_billing_invoices_created_total",
        "Total number of invoices created by outcome",
        &["outcome"]
    )
    .expect("Failed to register invoices_created_total")
});

/// Per-task billing failures during creation, by stage (line_item, ledger).
pub static LINE_ITEM_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "task_billing_line_item_failures_total",
        "Per-task billing failures during invoice creation",
        &["stage"]
    )
    .expect("Failed to register line_item_failures_total")
});

/// Invoices deleted, by kind (regular, consolidated).
pub static INVOICES_DELETED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "task_billing_invoices_deleted_total",
        "Total number of invoices deleted",
        &["kind"]
    )
    .expect("Failed to register invoices_deleted_total")
});

/// Failures after the point of no return, by step.
pub static ROLLBACK_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "task_billing_rollback_failures_total",
        "Ledger rollback and source revert failures",
        &["step"]
    )
    .expect("Failed to register rollback_failures_total")
});

/// Consolidations, by outcome (success, rejected, failed).
pub static CONSOLIDATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "task_billing_consolidations_total",
        "Invoice consolidation attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to register consolidations_total")
});

/// Line items reconstructed during consolidation, by kind (per_task, catch_all).
pub static SYNTHESIZED_LINE_ITEMS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "task_billing_synthesized_line_items_total",
        "Synthetic line items generated",
        &["kind"]
    )
    .expect("Failed to register synthesized_line_items_total")
});

/// Totals that failed to reconcile, by operation.
pub static RECONCILIATION_WARNINGS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "task_billing_reconciliation_warnings_total",
        "Line item totals that did not match the invoice total",
        &["operation"]
    )
    .expect("Failed to register reconciliation_warnings_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "task_billing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&INVOICES_CREATED_TOTAL);
    Lazy::force(&LINE_ITEM_FAILURES_TOTAL);
    Lazy::force(&INVOICES_DELETED_TOTAL);
    Lazy::force(&ROLLBACK_FAILURES_TOTAL);
    Lazy::force(&CONSOLIDATIONS_TOTAL);
    Lazy::force(&SYNTHESIZED_LINE_ITEMS_TOTAL);
    Lazy::force(&RECONCILIATION_WARNINGS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);

    if HTTP_METRICS_HANDLE.get().is_none() {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = HTTP_METRICS_HANDLE.set(handle);
            }
            Err(e) => tracing::warn!(error = %e, "HTTP metrics recorder not installed"),
        }
    }
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut body = encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default();
    if let Some(handle) = HTTP_METRICS_HANDLE.get() {
        body.push_str(&handle.render());
    }
    body
}
