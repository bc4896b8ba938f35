//! Invoice creation integration tests for task-billing-service.

mod common;

use common::{bill, d, invoice_input, task, Harness};
use rust_decimal::Decimal;
use task_billing_service::error::{BillingError, FailureStage};
use task_billing_service::models::{BillingMode, BillingType};
use task_billing_service::services::BillingStore;
use uuid::Uuid;

#[tokio::test]
async fn every_request_billed_produces_one_line_each() {
    let h = Harness::new();
    let project = Uuid::new_v4();
    let a = h.add_task(task(project, "Design", "40", "4000")).await;
    let b = h.add_task(task(project, "Build", "100", "12000")).await;
    let c = h.add_task(task(project, "Handover", "8", "800")).await;

    let outcome = h
        .create(invoice_input(
            Uuid::new_v4(),
            Some(project),
            "4400",
            vec![
                bill(a, BillingType::Percentage, "25", "1000"),
                bill(b, BillingType::Percentage, "25", "3000"),
                bill(c, BillingType::Milestone, "50", "400"),
            ],
        ))
        .await;

    assert!(outcome.is_complete());
    assert!(!outcome.used_fallback);
    assert!(outcome.reconciliation.is_none());
    assert_eq!(outcome.line_items.len(), 3);
    let sum: Decimal = outcome.line_items.iter().map(|i| i.amount).sum();
    assert_eq!(sum, outcome.invoice.subtotal);

    let stored = h
        .store
        .count_line_items(outcome.invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(stored, 3);

    let design = h.task(a).await;
    assert_eq!(design.billing_mode, BillingMode::Percentage);
    assert_eq!(design.billed_percentage, d("25"));
    assert_eq!(design.billed_amount, d("1000"));
    assert_eq!(h.task(c).await.billing_mode, BillingMode::Milestone);
}

#[tokio::test]
async fn all_requests_failing_leaves_single_fallback_line() {
    let h = Harness::new();
    let project = Uuid::new_v4();
    let a = h.add_task(task(project, "Design", "40", "4000")).await;
    let b = h.add_task(task(project, "Build", "100", "12000")).await;
    h.store.fail_line_items_for(a).await;
    h.store.fail_line_items_for(b).await;

    let outcome = h
        .create(invoice_input(
            Uuid::new_v4(),
            Some(project),
            "4000",
            vec![
                bill(a, BillingType::Percentage, "25", "1000"),
                bill(b, BillingType::Percentage, "25", "3000"),
            ],
        ))
        .await;

    assert!(outcome.used_fallback);
    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome
        .failures
        .iter()
        .all(|f| f.stage == FailureStage::LineItem));
    assert_eq!(outcome.line_items.len(), 1);

    let fallback = &outcome.line_items[0];
    assert_eq!(fallback.description, "2 tasks billed");
    assert_eq!(fallback.quantity, Decimal::ONE);
    assert_eq!(fallback.amount, d("4000"));
    assert_eq!(fallback.task_id, None);

    // nothing was billed on the tasks
    assert_eq!(h.task(a).await.billed_percentage, Decimal::ZERO);
    assert_eq!(h.task(b).await.billing_mode, BillingMode::Unset);
}

#[tokio::test]
async fn single_failed_request_falls_back_to_task_billing_line() {
    let h = Harness::new();
    let a = h
        .add_task(task(Uuid::new_v4(), "Design", "40", "4000"))
        .await;
    h.store.fail_line_items_for(a).await;

    let outcome = h
        .create(invoice_input(
            Uuid::new_v4(),
            None,
            "0",
            vec![bill(a, BillingType::Percentage, "10", "400")],
        ))
        .await;

    assert_eq!(outcome.line_items.len(), 1);
    assert_eq!(outcome.line_items[0].description, "Task billing");
    // no subtotal recorded, so the requested amount is used
    assert_eq!(outcome.line_items[0].amount, d("400"));
}

#[tokio::test]
async fn one_failure_does_not_stop_the_rest() {
    let h = Harness::new();
    let project = Uuid::new_v4();
    let a = h.add_task(task(project, "Design", "40", "4000")).await;
    let b = h.add_task(task(project, "Build", "100", "12000")).await;
    h.store.fail_line_items_for(a).await;

    let outcome = h
        .create(invoice_input(
            Uuid::new_v4(),
            Some(project),
            "4000",
            vec![
                bill(a, BillingType::Percentage, "25", "1000"),
                bill(b, BillingType::Percentage, "25", "3000"),
            ],
        ))
        .await;

    assert!(!outcome.used_fallback);
    assert_eq!(outcome.line_items.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].task_id, a);
    assert!(outcome.reconciliation.is_some());
    assert_eq!(h.task(b).await.billed_amount, d("3000"));

    let invoice_id = outcome.invoice.invoice_id;
    match outcome.into_complete() {
        Err(BillingError::PartialFailure {
            invoice_id: failed,
            failures,
        }) => {
            assert_eq!(failed, invoice_id);
            assert_eq!(failures.len(), 1);
        }
        other => panic!("expected partial failure, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn time_billed_task_is_refused_without_leaving_a_line() {
    let h = Harness::new();
    let project = Uuid::new_v4();
    let mut timed = task(project, "Support", "10", "1000");
    timed.billing_mode = BillingMode::Time;
    let timed = h.add_task(timed).await;
    let other = h.add_task(task(project, "Design", "40", "4000")).await;

    let outcome = h
        .create(invoice_input(
            Uuid::new_v4(),
            Some(project),
            "1000",
            vec![
                bill(timed, BillingType::Percentage, "50", "500"),
                bill(other, BillingType::Percentage, "25", "1000"),
            ],
        ))
        .await;

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].task_id, timed);
    assert_eq!(outcome.failures[0].stage, FailureStage::Ledger);
    assert!(outcome.line_items.iter().all(|i| i.task_id != Some(timed)));

    let support = h.task(timed).await;
    assert_eq!(support.billing_mode, BillingMode::Time);
    assert_eq!(support.billed_percentage, Decimal::ZERO);
}

#[tokio::test]
async fn billing_past_full_budget_is_refused() {
    let h = Harness::new();
    let mut nearly_done = task(Uuid::new_v4(), "Design", "40", "4000");
    nearly_done.billing_mode = BillingMode::Percentage;
    nearly_done.billed_percentage = d("90");
    nearly_done.billed_amount = d("3600");
    let id = h.add_task(nearly_done).await;

    let outcome = h
        .create(invoice_input(
            Uuid::new_v4(),
            None,
            "800",
            vec![bill(id, BillingType::Percentage, "20", "800")],
        ))
        .await;

    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.failures[0].message.contains("110"));
    assert!(outcome.used_fallback);
    assert_eq!(h.task(id).await.billed_percentage, d("90"));
}

#[tokio::test]
async fn unknown_task_still_gets_a_line() {
    let h = Harness::new();
    let ghost = Uuid::new_v4();
    let mut request = bill(ghost, BillingType::Milestone, "50", "750");
    request.total_budget = d("1500");

    let outcome = h
        .create(invoice_input(Uuid::new_v4(), None, "750", vec![request]))
        .await;

    assert!(!outcome.used_fallback);
    assert_eq!(outcome.line_items.len(), 1);
    assert_eq!(outcome.line_items[0].task_id, Some(ghost));
    assert_eq!(outcome.line_items[0].amount, d("750"));
    assert_eq!(outcome.line_items[0].task_total_budget, Some(d("1500")));
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].stage, FailureStage::Ledger);
}

#[tokio::test]
async fn failed_header_aborts_before_any_line() {
    let h = Harness::new();
    let a = h
        .add_task(task(Uuid::new_v4(), "Design", "40", "4000"))
        .await;
    h.store.fail_operation("create_invoice").await;

    let result = h
        .engine
        .create_invoice(invoice_input(
            Uuid::new_v4(),
            None,
            "1000",
            vec![bill(a, BillingType::Percentage, "25", "1000")],
        ))
        .await;

    assert!(matches!(result, Err(BillingError::Store(_))));
    assert_eq!(h.store.invoice_count().await, 0);
    assert_eq!(h.task(a).await.billed_percentage, Decimal::ZERO);
}

#[tokio::test]
async fn failed_count_uses_lines_inserted_in_this_run() {
    let h = Harness::new();
    let a = h
        .add_task(task(Uuid::new_v4(), "Design", "40", "4000"))
        .await;
    h.store.fail_operation("count_line_items").await;

    let outcome = h
        .create(invoice_input(
            Uuid::new_v4(),
            None,
            "1000",
            vec![bill(a, BillingType::Percentage, "25", "1000")],
        ))
        .await;

    assert!(!outcome.used_fallback);
    assert_eq!(outcome.line_items.len(), 1);
}

#[tokio::test]
async fn invoice_numbers_are_generated_when_missing() {
    let h = Harness::new();

    let first = h
        .create(invoice_input(Uuid::new_v4(), None, "10", vec![]))
        .await;
    let mut named = invoice_input(Uuid::new_v4(), None, "10", vec![]);
    named.invoice_number = Some("CUSTOM-1".into());
    let second = h.create(named).await;

    assert!(first.invoice.invoice_number.starts_with("INV-"));
    assert_eq!(second.invoice.invoice_number, "CUSTOM-1");
    // no tasks: still one line
    assert_eq!(first.line_items.len(), 1);
    assert_eq!(first.line_items[0].description, "Task billing");
}
