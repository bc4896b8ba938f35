//! HTTP API tests for task-billing-service.

mod common;

use common::{task, TestApp};
use serde_json::{json, Value};
use task_billing_service::services::BillingStore;
use uuid::Uuid;

async fn create_invoice(app: &TestApp, body: Value) -> Value {
    let response = app
        .client
        .post(app.url("/invoices"))
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 201);
    response.json().await.expect("Failed to parse response")
}

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "task-billing-service");
}

#[tokio::test]
async fn metrics_are_exposed() {
    let app = TestApp::spawn().await;
    create_invoice(
        &app,
        json!({ "client_id": Uuid::new_v4(), "subtotal": "10" }),
    )
    .await;

    let body = app
        .client
        .get(app.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("task_billing_invoices_created_total"));
    assert!(body.contains("http_requests_total"));
    assert!(body.contains("route=\"/invoices\""));
}

#[tokio::test]
async fn create_bills_tasks_and_reports_warnings() {
    let app = TestApp::spawn().await;
    let project = Uuid::new_v4();
    let design = task(project, "Design", "40", "4000");
    let design_id = design.task_id;
    app.store.insert_task(design).await;
    let ghost = Uuid::new_v4();

    let body = create_invoice(
        &app,
        json!({
            "client_id": Uuid::new_v4(),
            "project_id": project,
            "subtotal": "1500",
            "tax_rate": "10",
            "tasks": [
                {
                    "task_id": design_id,
                    "billing_type": "percentage",
                    "percentage_to_bill": "25",
                    "amount_to_bill": "1000"
                },
                {
                    "task_id": ghost,
                    "billing_type": "milestone",
                    "percentage_to_bill": "50",
                    "amount_to_bill": "500"
                }
            ]
        }),
    )
    .await;

    assert_eq!(body["invoice"]["status"], "draft");
    assert_eq!(body["invoice"]["tax_amount"], "150");
    assert_eq!(body["invoice"]["total"], "1650");
    assert_eq!(body["line_items"].as_array().unwrap().len(), 2);
    assert_eq!(body["used_fallback"], false);

    let warnings = body["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["task_id"], json!(ghost));
    assert_eq!(warnings[0]["stage"], "ledger");

    let billing: Value = app
        .client
        .get(app.url(&format!("/tasks/{}/billing", design_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(billing["billed_percentage"], "25");
    assert_eq!(billing["billed_amount"], "1000");
}

#[tokio::test]
async fn invalid_percentage_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(app.url("/invoices"))
        .json(&json!({
            "client_id": Uuid::new_v4(),
            "subtotal": "100",
            "tasks": [{
                "task_id": Uuid::new_v4(),
                "billing_type": "percentage",
                "percentage_to_bill": "0",
                "amount_to_bill": "100"
            }]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
    assert_eq!(app.store.invoice_count().await, 0);
}

#[tokio::test]
async fn consolidated_status_cannot_be_requested() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(app.url("/invoices"))
        .json(&json!({
            "client_id": Uuid::new_v4(),
            "subtotal": "100",
            "status": "consolidated"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn get_returns_invoice_with_lines() {
    let app = TestApp::spawn().await;
    let created = create_invoice(
        &app,
        json!({ "client_id": Uuid::new_v4(), "subtotal": "75" }),
    )
    .await;
    let id = created["invoice"]["invoice_id"].as_str().unwrap();

    let response = app
        .client
        .get(app.url(&format!("/invoices/{}", id)))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["invoice"]["invoice_id"], id);
    assert_eq!(body["line_items"][0]["amount"], "75");

    let missing = app
        .client
        .get(app.url(&format!("/invoices/{}", Uuid::new_v4())))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn delete_rolls_back_task_billing() {
    let app = TestApp::spawn().await;
    let design = task(Uuid::new_v4(), "Design", "40", "4000");
    let design_id = design.task_id;
    app.store.insert_task(design).await;

    let created = create_invoice(
        &app,
        json!({
            "client_id": Uuid::new_v4(),
            "subtotal": "1000",
            "tasks": [{
                "task_id": design_id,
                "billing_type": "percentage",
                "percentage_to_bill": "25",
                "amount_to_bill": "1000"
            }]
        }),
    )
    .await;
    let id = created["invoice"]["invoice_id"].as_str().unwrap();

    let response = app
        .client
        .delete(app.url(&format!("/invoices/{}", id)))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["deleted_line_items"], 1);
    assert_eq!(body["rolled_back"][0]["task_id"], json!(design_id));

    let task = app.store.get_task(design_id).await.unwrap().unwrap();
    assert!(task.billed_amount.is_zero());
}

#[tokio::test]
async fn bulk_delete_reports_missing_ids() {
    let app = TestApp::spawn().await;
    let created = create_invoice(
        &app,
        json!({ "client_id": Uuid::new_v4(), "subtotal": "10" }),
    )
    .await;

    let response = app
        .client
        .post(app.url("/invoices/bulk-delete"))
        .json(&json!({
            "invoice_ids": [created["invoice"]["invoice_id"], Uuid::new_v4()]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(app.store.invoice_count().await, 1);

    let empty = app
        .client
        .post(app.url("/invoices/bulk-delete"))
        .json(&json!({ "invoice_ids": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 422);
}

#[tokio::test]
async fn consolidate_merges_drafts_of_one_client() {
    let app = TestApp::spawn().await;
    let client = Uuid::new_v4();
    let a = create_invoice(&app, json!({ "client_id": client, "subtotal": "100" })).await;
    let b = create_invoice(&app, json!({ "client_id": client, "subtotal": "50" })).await;

    let response = app
        .client
        .post(app.url("/invoices/consolidate"))
        .json(&json!({
            "invoice_ids": [a["invoice"]["invoice_id"], b["invoice"]["invoice_id"]]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["consolidated_invoice"]["total"], "150");
    assert_eq!(body["copied_line_items"], 2);
    assert_eq!(
        body["consolidated_invoice"]["consolidated_from"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn consolidate_rejects_mixed_clients_with_message() {
    let app = TestApp::spawn().await;
    let a = create_invoice(&app, json!({ "client_id": Uuid::new_v4(), "subtotal": "100" })).await;
    let b = create_invoice(&app, json!({ "client_id": Uuid::new_v4(), "subtotal": "50" })).await;

    let response = app
        .client
        .post(app.url("/invoices/consolidate"))
        .json(&json!({
            "invoice_ids": [a["invoice"]["invoice_id"], b["invoice"]["invoice_id"]]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "All invoices must belong to the same client");
}

#[tokio::test]
async fn time_mode_lock_blocks_later_percentage_billing() {
    let app = TestApp::spawn().await;
    let support = task(Uuid::new_v4(), "Support", "10", "1000");
    let support_id = support.task_id;
    app.store.insert_task(support).await;

    let response = app
        .client
        .post(app.url(&format!("/tasks/{}/time-mode", support_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["billing_mode"], "time");

    let created = create_invoice(
        &app,
        json!({
            "client_id": Uuid::new_v4(),
            "subtotal": "100",
            "tasks": [{
                "task_id": support_id,
                "billing_type": "percentage",
                "percentage_to_bill": "10",
                "amount_to_bill": "100"
            }]
        }),
    )
    .await;
    assert_eq!(created["warnings"].as_array().unwrap().len(), 1);
    assert_eq!(created["used_fallback"], true);
}
