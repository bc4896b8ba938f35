//! Task billing ledger integration tests for task-billing-service.

mod common;

use common::{d, task, Harness};
use rust_decimal::Decimal;
use std::sync::Arc;
use task_billing_service::config::EngineSettings;
use task_billing_service::engine::TaskLedger;
use task_billing_service::error::BillingError;
use task_billing_service::models::BillingMode;
use tokio_test::assert_ok;
use uuid::Uuid;

#[tokio::test]
async fn lost_writes_are_retried() {
    let h = Harness::new();
    let id = h
        .add_task(task(Uuid::new_v4(), "Design", "40", "4000"))
        .await;
    h.store.contend_billing(id, 2).await;

    let billing = assert_ok!(
        h.engine
            .ledger()
            .advance(id, d("25"), d("1000"), BillingMode::Percentage)
            .await
    );

    assert_eq!(billing.billed_percentage, d("25"));
    assert_eq!(h.task(id).await.billed_amount, d("1000"));
}

#[tokio::test]
async fn persistent_contention_gives_up() {
    let h = Harness::with_settings(EngineSettings {
        ledger_update_attempts: 3,
        ..EngineSettings::default()
    });
    let id = h
        .add_task(task(Uuid::new_v4(), "Design", "40", "4000"))
        .await;
    h.store.contend_billing(id, 5).await;

    let result = h
        .engine
        .ledger()
        .advance(id, d("25"), d("1000"), BillingMode::Percentage)
        .await;

    match result {
        Err(BillingError::ConcurrentModification { task_id, attempts }) => {
            assert_eq!(task_id, id);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected concurrent modification, got {:?}", other),
    }
    assert_eq!(h.task(id).await.billed_percentage, Decimal::ZERO);
}

#[tokio::test]
async fn concurrent_advances_are_not_lost() {
    let h = Harness::new();
    let id = h
        .add_task(task(Uuid::new_v4(), "Design", "40", "4000"))
        .await;
    let ledger = Arc::new(TaskLedger::new(h.store.clone(), 10, true));

    let first = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .advance(id, d("10"), d("400"), BillingMode::Percentage)
                .await
        })
    };
    let second = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            ledger
                .advance(id, d("15"), d("600"), BillingMode::Percentage)
                .await
        })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let billed = ledger.current_billed(id).await.unwrap();
    assert_eq!(billed.percentage, d("25"));
    assert_eq!(billed.amount, d("1000"));
}

#[tokio::test]
async fn time_mode_blocks_percentage_billing() {
    let h = Harness::new();
    let id = h
        .add_task(task(Uuid::new_v4(), "Support", "10", "1000"))
        .await;
    let ledger = h.engine.ledger();

    let locked = ledger.lock_time_mode(id).await.unwrap();
    assert_eq!(locked.mode, BillingMode::Time);
    // locking twice is fine
    ledger.lock_time_mode(id).await.unwrap();

    let result = ledger
        .advance(id, d("10"), d("100"), BillingMode::Percentage)
        .await;
    assert!(matches!(result, Err(BillingError::ModeConflict { .. })));
}

#[tokio::test]
async fn billed_task_cannot_switch_to_time() {
    let h = Harness::new();
    let id = h
        .add_task(task(Uuid::new_v4(), "Design", "40", "4000"))
        .await;
    let ledger = h.engine.ledger();
    ledger
        .advance(id, d("10"), d("400"), BillingMode::Milestone)
        .await
        .unwrap();

    let result = ledger.lock_time_mode(id).await;

    assert!(matches!(result, Err(BillingError::ModeConflict { .. })));
    assert_eq!(h.task(id).await.billing_mode, BillingMode::Milestone);
}

#[tokio::test]
async fn current_billed_reports_running_totals() {
    let h = Harness::new();
    let id = h
        .add_task(task(Uuid::new_v4(), "Design", "40", "4000"))
        .await;
    let ledger = h.engine.ledger();
    ledger
        .advance(id, d("10"), d("400"), BillingMode::Percentage)
        .await
        .unwrap();
    ledger
        .advance(id, d("12.5"), d("500"), BillingMode::Percentage)
        .await
        .unwrap();
    ledger.retreat(id, d("10"), d("400")).await.unwrap();

    let billed = ledger.current_billed(id).await.unwrap();
    assert_eq!(billed.percentage, d("12.5"));
    assert_eq!(billed.amount, d("500"));
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let h = Harness::new();
    let result = h.engine.ledger().current_billed(Uuid::new_v4()).await;
    assert!(matches!(result, Err(BillingError::TaskNotFound(_))));
}

#[tokio::test]
async fn negative_deltas_are_rejected() {
    let h = Harness::new();
    let id = h
        .add_task(task(Uuid::new_v4(), "Design", "40", "4000"))
        .await;

    let result = h
        .engine
        .ledger()
        .advance(id, d("-5"), d("100"), BillingMode::Percentage)
        .await;

    assert!(matches!(result, Err(BillingError::Validation(_))));
    assert_eq!(h.task(id).await.billing_mode, BillingMode::Unset);
}
