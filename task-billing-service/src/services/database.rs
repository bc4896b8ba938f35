//! PostgreSQL store for task-billing-service.

use crate::models::{Invoice, LineItem, NewInvoice, NewLineItem, Task, TaskBilling};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::BillingStore;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "invoice_id, invoice_number, client_id, project_id, project_name, \
     status, subtotal, tax_rate, tax_amount, total, consolidated_into, consolidated_from, created_utc";

const LINE_ITEM_COLUMNS: &str = "line_item_id, invoice_id, task_id, description, quantity, \
     unit_price, amount, billed_percentage, billing_type, task_total_budget, sort_order, created_utc";

const TASK_COLUMNS: &str = "task_id, project_id, name, estimated_hours, estimated_fees, \
     total_budget, billing_unit, billing_mode, billed_percentage, billed_amount";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "task-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Health check failed"))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Task Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(task_id = %task_id))]
    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_task"])
            .start_timer();

        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE task_id = $1",
            TASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get task"))?;

        timer.observe_duration();

        Ok(task)
    }

    #[instrument(skip(self), fields(project_id = %project_id))]
    async fn list_billed_tasks(&self, project_id: Uuid) -> Result<Vec<Task>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_billed_tasks"])
            .start_timer();

        let tasks = sqlx::query_as::<_, Task>(&format!(
            r#"
            SELECT {}
            FROM tasks
            WHERE project_id = $1 AND billed_amount > 0
            ORDER BY name, task_id
            "#,
            TASK_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list billed tasks"))?;

        timer.observe_duration();

        Ok(tasks)
    }

    #[instrument(skip(self, expected, next), fields(task_id = %task_id))]
    async fn update_task_billing(
        &self,
        task_id: Uuid,
        expected: &TaskBilling,
        next: &TaskBilling,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_task_billing"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET billing_mode = $5,
                billed_percentage = $6,
                billed_amount = $7,
                updated_utc = NOW()
            WHERE task_id = $1
              AND billing_mode = $2
              AND billed_percentage = $3
              AND billed_amount = $4
            "#,
        )
        .bind(task_id)
        .bind(expected.mode)
        .bind(expected.billed_percentage)
        .bind(expected.billed_amount)
        .bind(next.mode)
        .bind(next.billed_percentage)
        .bind(next.billed_amount)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update task billing"))?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    // -------------------------------------------------------------------------
    // Invoice Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(client_id = %input.client_id))]
    async fn create_invoice(&self, input: &NewInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let invoice_id = Uuid::new_v4();
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (
                invoice_id, invoice_number, client_id, project_id, project_name, status,
                subtotal, tax_rate, tax_amount, total, consolidated_from
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .bind(&input.invoice_number)
        .bind(input.client_id)
        .bind(input.project_id)
        .bind(&input.project_name)
        .bind(input.status)
        .bind(input.subtotal)
        .bind(input.tax_rate)
        .bind(input.tax_amount)
        .bind(input.total)
        .bind(&input.consolidated_from)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice number '{}' is already taken",
                    input.invoice_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        timer.observe_duration();

        info!(invoice_id = %invoice.invoice_id, invoice_number = %invoice.invoice_number, "Invoice created");

        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE invoice_id = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get invoice"))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self), fields(count = invoice_ids.len()))]
    async fn get_invoices(&self, invoice_ids: &[Uuid]) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE invoice_id = ANY($1) ORDER BY created_utc, invoice_id",
            INVOICE_COLUMNS
        ))
        .bind(invoice_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to get invoices"))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self), fields(consolidated_into = %consolidated_into))]
    async fn mark_consolidated(
        &self,
        invoice_ids: &[Uuid],
        consolidated_into: Uuid,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_consolidated"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET consolidated_into = $2,
                status = 'consolidated'
            WHERE invoice_id = ANY($1)
              AND status = 'draft'
              AND consolidated_into IS NULL
            "#,
        )
        .bind(invoice_ids)
        .bind(consolidated_into)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to mark invoices consolidated"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(count = invoice_ids.len()))]
    async fn revert_consolidation(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["revert_consolidation"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET consolidated_into = NULL,
                status = 'draft'
            WHERE invoice_id = ANY($1)
            "#,
        )
        .bind(invoice_ids)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to revert consolidation"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(count = invoice_ids.len()))]
    async fn delete_invoices(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoices"])
            .start_timer();

        let result = sqlx::query("DELETE FROM invoices WHERE invoice_id = ANY($1)")
            .bind(invoice_ids)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete invoices"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    // -------------------------------------------------------------------------
    // Line Item Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(invoice_id = %input.invoice_id))]
    async fn insert_line_item(&self, input: &NewLineItem) -> Result<LineItem, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_line_item"])
            .start_timer();

        let line_item = sqlx::query_as::<_, LineItem>(&format!(
            r#"
            INSERT INTO invoice_line_items (
                line_item_id, invoice_id, task_id, description, quantity, unit_price, amount,
                billed_percentage, billing_type, task_total_budget, sort_order
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            LINE_ITEM_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.invoice_id)
        .bind(input.task_id)
        .bind(&input.description)
        .bind(input.quantity)
        .bind(input.unit_price)
        .bind(input.amount)
        .bind(input.billed_percentage)
        .bind(input.billing_type)
        .bind(input.task_total_budget)
        .bind(input.sort_order)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to insert line item"))?;

        timer.observe_duration();

        Ok(line_item)
    }

    #[instrument(skip(self, inputs), fields(count = inputs.len()))]
    async fn insert_line_items(&self, inputs: &[NewLineItem]) -> Result<Vec<LineItem>, AppError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_line_items"])
            .start_timer();

        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO invoice_line_items (line_item_id, invoice_id, task_id, description, \
             quantity, unit_price, amount, billed_percentage, billing_type, task_total_budget, \
             sort_order) ",
        );
        builder.push_values(inputs, |mut row, item| {
            row.push_bind(Uuid::new_v4())
                .push_bind(item.invoice_id)
                .push_bind(item.task_id)
                .push_bind(&item.description)
                .push_bind(item.quantity)
                .push_bind(item.unit_price)
                .push_bind(item.amount)
                .push_bind(item.billed_percentage)
                .push_bind(item.billing_type)
                .push_bind(item.task_total_budget)
                .push_bind(item.sort_order);
        });
        builder.push(" RETURNING ");
        builder.push(LINE_ITEM_COLUMNS);

        let mut line_items = builder
            .build_query_as::<LineItem>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to insert line items"))?;
        line_items.sort_by_key(|item| item.sort_order);

        timer.observe_duration();

        Ok(line_items)
    }

    #[instrument(skip(self), fields(count = invoice_ids.len()))]
    async fn list_line_items(&self, invoice_ids: &[Uuid]) -> Result<Vec<LineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_line_items"])
            .start_timer();

        let line_items = sqlx::query_as::<_, LineItem>(&format!(
            r#"
            SELECT {}
            FROM invoice_line_items
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, sort_order, created_utc
            "#,
            LINE_ITEM_COLUMNS
        ))
        .bind(invoice_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list line items"))?;

        timer.observe_duration();

        Ok(line_items)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn count_line_items(&self, invoice_id: Uuid) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_line_items"])
            .start_timer();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM invoice_line_items WHERE invoice_id = $1")
                .bind(invoice_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("Failed to count line items"))?;

        timer.observe_duration();

        Ok(count)
    }

    #[instrument(skip(self), fields(count = invoice_ids.len()))]
    async fn delete_line_items(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_line_items"])
            .start_timer();

        let result = sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = ANY($1)")
            .bind(invoice_ids)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete line items"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    // -------------------------------------------------------------------------
    // Time Entry Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(count = invoice_ids.len()))]
    async fn detach_time_entries(&self, invoice_ids: &[Uuid]) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["detach_time_entries"])
            .start_timer();

        let result =
            sqlx::query("UPDATE time_entries SET invoice_id = NULL WHERE invoice_id = ANY($1)")
                .bind(invoice_ids)
                .execute(&self.pool)
                .await
                .map_err(db_error("Failed to detach time entries"))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }
}
