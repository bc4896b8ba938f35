//! Configuration module for task-billing-service.

use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub database: DatabaseConfig,
    pub store: StoreBackend,
    pub retry: RetrySettings,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

/// Bounded retry applied to store calls.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub attempt_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Allowed gap between line item sums and invoice totals.
    pub reconciliation_tolerance: Decimal,
    /// Conditional-write attempts per ledger update before giving up.
    pub ledger_update_attempts: u32,
    pub enforce_budget_ceiling: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reconciliation_tolerance: Decimal::new(1, 2),
            ledger_update_attempts: 3,
            enforce_budget_ceiling: true,
        }
    }
}

impl BillingConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = common.is_production();

        let store: StoreBackend = get_env("STORE_BACKEND", Some("postgres"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let database_url = match store {
            StoreBackend::Postgres => get_env("DATABASE_URL", None, is_prod)?,
            StoreBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };

        let retry_defaults = RetrySettings::default();
        let engine_defaults = EngineSettings::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "task-billing-service".to_string()),
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            store,
            retry: RetrySettings {
                max_retries: parse_env("STORE_MAX_RETRIES", retry_defaults.max_retries)?,
                initial_backoff_ms: parse_env(
                    "STORE_INITIAL_BACKOFF_MS",
                    retry_defaults.initial_backoff_ms,
                )?,
                attempt_timeout_ms: parse_env(
                    "STORE_ATTEMPT_TIMEOUT_MS",
                    retry_defaults.attempt_timeout_ms,
                )?,
            },
            engine: EngineSettings {
                reconciliation_tolerance: parse_env(
                    "RECONCILIATION_TOLERANCE",
                    engine_defaults.reconciliation_tolerance,
                )?,
                ledger_update_attempts: parse_env(
                    "LEDGER_UPDATE_ATTEMPTS",
                    engine_defaults.ledger_update_attempts,
                )?,
                enforce_budget_ceiling: parse_env(
                    "ENFORCE_BUDGET_CEILING",
                    engine_defaults.enforce_budget_ceiling,
                )?,
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn store_backend_parses_case_insensitively() {
        assert_eq!("Memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("postgres".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert!("mongo".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn retry_settings_build_policy() {
        let policy = RetrySettings {
            max_retries: 5,
            initial_backoff_ms: 20,
            attempt_timeout_ms: 750,
        }
        .policy();

        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(20));
        assert_eq!(policy.attempt_timeout, Duration::from_millis(750));
    }

    #[test]
    fn default_tolerance_is_one_cent() {
        assert_eq!(
            EngineSettings::default().reconciliation_tolerance.to_string(),
            "0.01"
        );
    }

    #[test]
    #[serial]
    fn memory_backend_needs_no_database_url() {
        env::set_var("STORE_BACKEND", "memory");
        env::remove_var("DATABASE_URL");
        env::set_var("LEDGER_UPDATE_ATTEMPTS", "7");

        let config = BillingConfig::load().unwrap();

        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.engine.ledger_update_attempts, 7);
        assert!(config.engine.enforce_budget_ceiling);

        env::remove_var("STORE_BACKEND");
        env::remove_var("LEDGER_UPDATE_ATTEMPTS");
    }

    #[test]
    #[serial]
    fn postgres_backend_requires_database_url() {
        env::set_var("STORE_BACKEND", "postgres");
        env::remove_var("DATABASE_URL");

        assert!(BillingConfig::load().is_err());

        env::remove_var("STORE_BACKEND");
    }

    #[test]
    #[serial]
    fn malformed_number_is_a_config_error() {
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("RECONCILIATION_TOLERANCE", "a lot");

        let err = BillingConfig::load().unwrap_err();
        assert!(err.to_string().contains("RECONCILIATION_TOLERANCE"));

        env::remove_var("STORE_BACKEND");
        env::remove_var("RECONCILIATION_TOLERANCE");
    }
}
