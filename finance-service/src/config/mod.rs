//! Configuration module for finance-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TECHNICIAN_PAYMENT_CATEGORY: &str = "technician_payment";

#[derive(Debug, Clone)]
pub struct FinanceConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    /// `None` disables the background overdue sweep.
    pub sweep_interval: Option<Duration>,
    /// Expense categories counted as technician payouts.
    pub technician_payment_categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound for one store operation, transaction included.
    pub operation_timeout: Duration,
    /// Server-side `statement_timeout` set on every pooled connection.
    pub statement_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 2,
            operation_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(15),
        }
    }
}

impl FinanceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let url = env::var("DATABASE_URL")
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required")))?;
        let defaults = DatabaseConfig::new(url);

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "finance-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", defaults.max_connections),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", defaults.min_connections),
                operation_timeout: Duration::from_secs(env_or(
                    "DATABASE_OPERATION_TIMEOUT_SECS",
                    defaults.operation_timeout.as_secs(),
                )),
                statement_timeout: Duration::from_secs(env_or(
                    "DATABASE_STATEMENT_TIMEOUT_SECS",
                    defaults.statement_timeout.as_secs(),
                )),
                ..defaults
            },
            sweep_interval: sweep_interval(env_or("OVERDUE_SWEEP_INTERVAL_SECS", 3600)),
            technician_payment_categories: parse_categories(
                env::var("TECHNICIAN_PAYMENT_CATEGORIES").ok().as_deref(),
            ),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn sweep_interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Comma-separated category list; blank or missing falls back to the default.
pub fn parse_categories(raw: Option<&str>) -> Vec<String> {
    let categories: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if categories.is_empty() {
        vec![DEFAULT_TECHNICIAN_PAYMENT_CATEGORY.to_string()]
    } else {
        categories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_default_when_unset_or_blank() {
        assert_eq!(parse_categories(None), vec!["technician_payment"]);
        assert_eq!(parse_categories(Some(" , ")), vec!["technician_payment"]);
    }

    #[test]
    fn categories_are_trimmed() {
        assert_eq!(
            parse_categories(Some("technician_payment, subcontractor ,")),
            vec!["technician_payment", "subcontractor"]
        );
    }

    #[test]
    fn zero_interval_disables_sweep() {
        assert_eq!(sweep_interval(0), None);
        assert_eq!(sweep_interval(60), Some(Duration::from_secs(60)));
    }
}
