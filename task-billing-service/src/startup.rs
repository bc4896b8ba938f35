//! Application startup and lifecycle management.

use crate::config::{BillingConfig, StoreBackend};
use crate::engine::BillingEngine;
use crate::handlers;
use crate::services::{
    init_metrics, BillingStore, Database, MemoryStore, RetryingStore, SequentialNumbering,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub store: Arc<dyn BillingStore>,
    pub engine: BillingEngine,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application, connecting to the configured store.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let store: Arc<dyn BillingStore> = match config.store {
            StoreBackend::Postgres => {
                let db = Database::new(
                    &config.database.url,
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;

                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::build_with_store(config, store).await
    }

    /// Build the application over an existing store. Store calls are wrapped
    /// in the configured retry policy.
    pub async fn build_with_store(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn BillingStore> =
            Arc::new(RetryingStore::new(store, config.retry.policy()));
        let engine = BillingEngine::new(
            store.clone(),
            Arc::new(SequentialNumbering::new()),
            config.engine.clone(),
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, store = ?config.store, "Task billing service listener bound");

        Ok(Self {
            port,
            listener,
            state: AppState {
                config,
                store,
                engine,
            },
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);

        tracing::info!(port = self.port, "HTTP server starting");
        axum::serve(self.listener, router).await
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/invoices", post(handlers::create_invoice))
        .route("/invoices/bulk-delete", post(handlers::bulk_delete_invoices))
        .route("/invoices/consolidate", post(handlers::consolidate_invoices))
        .route(
            "/invoices/:invoice_id",
            get(handlers::get_invoice).delete(handlers::delete_invoice),
        )
        .route("/tasks/:task_id/billing", get(handlers::get_task_billing))
        .route("/tasks/:task_id/time-mode", post(handlers::lock_time_mode))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
