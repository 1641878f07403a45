//! Configuration module for payment-reconciliation-service.

use secrecy::Secret;
use service_core::config::{self as core_config, env_flag, env_or};
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub sweep: SweepConfig,
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_count: usize,
    pub queue_size: usize,
    pub max_retry_secs: u64,
}

impl WorkerConfig {
    pub fn max_retry_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_retry_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_count: 4,
            queue_size: 1024,
            max_retry_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// `None` disables the periodic sweep; on-demand sweeps still work.
    pub interval: Option<Duration>,
    pub concurrency: usize,
    pub batch_limit: usize,
    /// Grace period before a `received`/`scored` event counts as stuck.
    pub stale_after: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(300)),
            concurrency: 8,
            batch_limit: 500,
            stale_after: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Restrict candidates to the payer's invoices when the phone identifies them.
    pub customer_scoping: bool,
    pub default_country_code: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            customer_scoping: true,
            default_country_code: "254".to_string(),
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let store: StoreBackend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let database_url = env::var("DATABASE_URL").ok().map(Secret::new);
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_URL is required when STORE_BACKEND=postgres"
            )));
        }

        let sweep_interval_secs: u64 = env_or("SWEEP_INTERVAL_SECS", 300)?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "payment-reconciliation-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            store,
            database: DatabaseConfig {
                url: database_url,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            worker: WorkerConfig {
                enabled: env_flag("WORKER_ENABLED", true)?,
                worker_count: env_or("WORKER_COUNT", 4usize)?.max(1),
                queue_size: env_or("WORKER_QUEUE_SIZE", 1024usize)?.max(1),
                max_retry_secs: env_or("WORKER_MAX_RETRY_SECS", 60)?,
            },
            sweep: SweepConfig {
                interval: (sweep_interval_secs > 0).then(|| Duration::from_secs(sweep_interval_secs)),
                concurrency: env_or("SWEEP_CONCURRENCY", 8usize)?.max(1),
                batch_limit: env_or("SWEEP_BATCH_LIMIT", 500usize)?,
                stale_after: Duration::from_secs(env_or("SWEEP_STALE_AFTER_SECS", 120)?),
            },
            matching: MatchingConfig {
                customer_scoping: env_flag("CANDIDATE_CUSTOMER_SCOPING", true)?,
                default_country_code: env::var("DEFAULT_COUNTRY_CODE")
                    .unwrap_or_else(|_| "254".to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(
            "PostgreSQL".parse::<StoreBackend>().unwrap(),
            StoreBackend::Postgres
        );
        assert!("mongo".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_defaults() {
        let sweep = SweepConfig::default();
        assert_eq!(sweep.concurrency, 8);
        assert_eq!(MatchingConfig::default().default_country_code, "254");
        assert_eq!(
            WorkerConfig::default().max_retry_elapsed(),
            Duration::from_secs(60)
        );
    }
}
