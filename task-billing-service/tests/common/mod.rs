//! Shared fixtures for task-billing-service integration tests.
#![allow(dead_code)]

use rust_decimal::Decimal;
use service_core::config::Config;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use task_billing_service::config::{
    BillingConfig, DatabaseConfig, EngineSettings, RetrySettings, StoreBackend,
};
use task_billing_service::engine::{BillingEngine, CreateInvoiceInput, CreationOutcome};
use task_billing_service::models::{
    BillingMode, BillingType, BillingUnit, InvoiceStatus, Task, TaskBillingRequest,
};
use task_billing_service::services::{BillingStore, MemoryStore, SequentialNumbering};
use task_billing_service::startup::Application;
use uuid::Uuid;

pub fn d(value: &str) -> Decimal {
    Decimal::from_str(value).expect("invalid decimal literal")
}

/// Unbilled task with the given estimate.
pub fn task(project_id: Uuid, name: &str, hours: &str, fees: &str) -> Task {
    Task {
        task_id: Uuid::new_v4(),
        project_id,
        name: name.to_string(),
        estimated_hours: Some(d(hours)),
        estimated_fees: Some(d(fees)),
        total_budget: None,
        billing_unit: BillingUnit::Hours,
        billing_mode: BillingMode::Unset,
        billed_percentage: Decimal::ZERO,
        billed_amount: Decimal::ZERO,
    }
}

pub fn bill(task_id: Uuid, billing_type: BillingType, pct: &str, amount: &str) -> TaskBillingRequest {
    TaskBillingRequest {
        task_id,
        billing_type,
        percentage_to_bill: d(pct),
        amount_to_bill: d(amount),
        total_budget: Decimal::ZERO,
        previous_billed_percentage: Decimal::ZERO,
        previous_billed_amount: Decimal::ZERO,
    }
}

pub fn invoice_input(
    client_id: Uuid,
    project_id: Option<Uuid>,
    subtotal: &str,
    tasks: Vec<TaskBillingRequest>,
) -> CreateInvoiceInput {
    CreateInvoiceInput {
        invoice_number: None,
        client_id,
        project_id,
        project_name: None,
        status: InvoiceStatus::Draft,
        subtotal: d(subtotal),
        tax_rate: Decimal::ZERO,
        tax_amount: Decimal::ZERO,
        total: d(subtotal),
        tasks,
    }
}

/// Engine over an in-memory store, no retry layer.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: BillingEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = BillingEngine::new(
            store.clone(),
            Arc::new(SequentialNumbering::new()),
            settings,
        );
        Self { store, engine }
    }

    pub async fn add_task(&self, task: Task) -> Uuid {
        let task_id = task.task_id;
        self.store.insert_task(task).await;
        task_id
    }

    pub async fn task(&self, task_id: Uuid) -> Task {
        self.store
            .get_task(task_id)
            .await
            .expect("store failure")
            .expect("task missing")
    }

    pub async fn create(&self, input: CreateInvoiceInput) -> CreationOutcome {
        self.engine
            .create_invoice(input)
            .await
            .expect("Failed to create invoice")
    }
}

pub fn test_config() -> BillingConfig {
    BillingConfig {
        common: Config {
            port: 0,
            log_level: "info".to_string(),
            otlp_endpoint: None,
            environment: "test".to_string(),
        },
        service_name: "task-billing-service-test".to_string(),
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 1,
        },
        store: StoreBackend::Memory,
        retry: RetrySettings {
            max_retries: 1,
            initial_backoff_ms: 1,
            attempt_timeout_ms: 2_000,
        },
        engine: EngineSettings::default(),
    }
}

/// Service running on a random port over an in-memory store.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<MemoryStore>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let store = Arc::new(MemoryStore::new());
        let app = Application::build_with_store(test_config(), store.clone())
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Self {
            address,
            port,
            store,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}
