// src/config.rs

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::{
    common::retry::RetryPolicy,
    db::{DynamoTable, ItemTable, MemoryTable, PgTable},
    services::{ItemStore, item_store::ListConfig},
    telemetry::{MetricsSink, PrometheusMetrics},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },
    #[error("{name} has an invalid value {value:?}: expected {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    DynamoDb {
        table_name: String,
        endpoint: Option<String>,
        create_table: bool,
        region: String,
    },
    Postgres {
        database_url: String,
        max_connections: u32,
    },
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub local_debug: bool,
    pub log_format: LogFormat,
    pub request_timeout: Duration,
    pub max_scan_pages: u32,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Config {
    /// Reads the process environment, after loading `.env` when present.
    ///
    /// | Env Var                    | Default     |
    /// |----------------------------|-------------|
    /// | `HOST`                     | `0.0.0.0`   |
    /// | `PORT`                     | `8080`      |
    /// | `STORE_BACKEND`            | `dynamodb`  |
    /// | `DYNAMODB_TABLE_NAME`      | required for `dynamodb` |
    /// | `DYNAMODB_ENDPOINT`        | unset       |
    /// | `DYNAMODB_CREATE_TABLE`    | `false`     |
    /// | `AWS_REGION`               | `us-east-1` |
    /// | `DATABASE_URL`             | required for `postgres` |
    /// | `DATABASE_MAX_CONNECTIONS` | `5`         |
    /// | `LOCAL_DEBUG`              | `false`     |
    /// | `LOG_FORMAT`               | `compact`   |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`        |
    /// | `LIST_MAX_SCAN_PAGES`      | `10`        |
    /// | `RETRY_MAX_ATTEMPTS`       | `3`         |
    /// | `RETRY_BASE_DELAY_MS`      | `25`        |
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let env = Env(vars);

        let backend = match env.get("STORE_BACKEND").unwrap_or("dynamodb") {
            "dynamodb" => Backend::DynamoDb {
                table_name: env.required("DYNAMODB_TABLE_NAME")?.to_string(),
                endpoint: env.get("DYNAMODB_ENDPOINT").map(str::to_string),
                create_table: env.parse_or("DYNAMODB_CREATE_TABLE", false, "true or false")?,
                region: env.get("AWS_REGION").unwrap_or("us-east-1").to_string(),
            },
            "postgres" => Backend::Postgres {
                database_url: env.required("DATABASE_URL")?.to_string(),
                max_connections: env.parse_or("DATABASE_MAX_CONNECTIONS", 5, "a positive integer")?,
            },
            "memory" => Backend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: other.to_string(),
                    expected: "dynamodb, postgres or memory",
                });
            }
        };

        let log_format = match env.get("LOG_FORMAT").unwrap_or("compact") {
            "compact" => LogFormat::Compact,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value: other.to_string(),
                    expected: "compact or json",
                });
            }
        };

        Ok(Self {
            host: env.get("HOST").unwrap_or("0.0.0.0").to_string(),
            port: env.parse_or("PORT", 8080, "a port number")?,
            backend,
            local_debug: env.parse_or("LOCAL_DEBUG", false, "true or false")?,
            log_format,
            request_timeout: Duration::from_secs(env.parse_or(
                "REQUEST_TIMEOUT_SECS",
                30,
                "a number of seconds",
            )?),
            max_scan_pages: env.parse_or("LIST_MAX_SCAN_PAGES", 10, "a positive integer")?,
            retry_max_attempts: env.parse_or("RETRY_MAX_ATTEMPTS", 3, "a positive integer")?,
            retry_base_delay: Duration::from_millis(env.parse_or(
                "RETRY_BASE_DELAY_MS",
                25,
                "a number of milliseconds",
            )?),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
        }
    }
}

struct Env<'a>(&'a HashMap<String, String>);

impl Env<'_> {
    /// Unset and blank variables both count as absent.
    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<&str, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing { name })
    }

    fn parse_or<T: std::str::FromStr>(
        &self,
        name: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name,
                value: raw.to_string(),
                expected,
            }),
        }
    }
}

// ---
// Shared application state
// ---
#[derive(Clone)]
pub struct AppState {
    pub store: ItemStore,
    pub metrics: Arc<dyn MetricsSink>,
}

impl AppState {
    pub fn from_parts(store: ItemStore, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, metrics }
    }

    /// Connects the configured backend and assembles the store.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let table: Arc<dyn ItemTable> = match &config.backend {
            Backend::DynamoDb {
                table_name,
                endpoint,
                create_table,
                region,
            } => {
                let table = DynamoTable::connect(region, endpoint.as_deref(), table_name).await;
                if *create_table {
                    table.ensure_table().await?;
                }
                tracing::info!(table = table.table_name(), region = %region, "using DynamoDB table");
                Arc::new(table)
            }
            Backend::Postgres {
                database_url,
                max_connections,
            } => {
                let pool = PgPoolOptions::new()
                    .max_connections(*max_connections)
                    .acquire_timeout(Duration::from_secs(3))
                    .connect(database_url)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                let table = PgTable::new(pool);
                table.migrate().await.context("failed to run migrations")?;
                tracing::info!("using PostgreSQL table");
                Arc::new(table)
            }
            Backend::Memory => {
                tracing::warn!("using in-memory table, data is lost on restart");
                Arc::new(MemoryTable::new())
            }
        };

        let store = ItemStore::new(table)
            .with_list_config(ListConfig {
                max_scan_pages: config.max_scan_pages,
            })
            .with_retry(config.retry_policy());
        let metrics = PrometheusMetrics::new().context("failed to register metrics")?;

        Ok(Self::from_parts(store, Arc::new(metrics)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_vars(&vars(&[("DYNAMODB_TABLE_NAME", "items")])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Compact);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_scan_pages, 10);
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(25));
        assert_eq!(
            config.backend,
            Backend::DynamoDb {
                table_name: "items".into(),
                endpoint: None,
                create_table: false,
                region: "us-east-1".into(),
            }
        );
    }

    #[test]
    fn dynamodb_requires_a_table_name() {
        assert_eq!(
            Config::from_vars(&vars(&[])),
            Err(ConfigError::Missing {
                name: "DYNAMODB_TABLE_NAME"
            })
        );
    }

    #[test]
    fn postgres_backend_reads_database_settings() {
        let config = Config::from_vars(&vars(&[
            ("STORE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/store"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            Backend::Postgres {
                database_url: "postgres://localhost/store".into(),
                max_connections: 12,
            }
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn malformed_values_are_reported() {
        let err = Config::from_vars(&vars(&[("STORE_BACKEND", "memory"), ("PORT", "http")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "PORT",
                value: "http".into(),
                expected: "a port number",
            }
        );

        let err = Config::from_vars(&vars(&[("STORE_BACKEND", "redis")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "STORE_BACKEND", .. }));
    }
}
