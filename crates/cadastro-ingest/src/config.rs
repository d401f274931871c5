//! Configuration management

use std::path::PathBuf;

use serde::Serialize;

use cadastro_common::{CadastroError, Result};

use crate::db::DbConfig;

// ============================================================================
// Ingestion Defaults
// ============================================================================

/// Default input file, relative to the working directory.
pub const DEFAULT_INGEST_FILE: &str = "./assets/base_teste.txt";

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// Default number of full batches buffered between reader and writer.
pub const DEFAULT_QUEUE_DEPTH: usize = 2;

/// Default number of batch writes in flight.
pub const DEFAULT_WRITER_CONCURRENCY: usize = 1;

// ============================================================================
// Reconciliation Defaults
// ============================================================================

/// Default number of customers fetched per page.
pub const DEFAULT_RECONCILE_PAGE_SIZE: i64 = 10_000;

/// Parse `key` when set; a value that does not parse is a configuration error.
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CadastroError::config(format!("{} has an invalid value: '{}'", key, value))),
        Err(_) => Ok(None),
    }
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Ingestion settings
#[derive(Debug, Clone, Serialize)]
pub struct IngestConfig {
    pub file: PathBuf,
    pub batch_size: usize,
    pub queue_depth: usize,
    pub writer_concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_INGEST_FILE),
            batch_size: DEFAULT_BATCH_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            writer_concurrency: DEFAULT_WRITER_CONCURRENCY,
        }
    }
}

impl IngestConfig {
    /// Read `INGEST_*` variables over the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            file: std::env::var("INGEST_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.file),
            batch_size: env_parse("INGEST_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            queue_depth: env_parse("INGEST_QUEUE_DEPTH")?.unwrap_or(defaults.queue_depth),
            writer_concurrency: env_parse("INGEST_WRITER_CONCURRENCY")?
                .unwrap_or(defaults.writer_concurrency),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.file.as_os_str().is_empty() {
            return Err(CadastroError::config("Input file path cannot be empty"));
        }
        if self.batch_size == 0 {
            return Err(CadastroError::config("Batch size must be greater than 0"));
        }
        if self.queue_depth == 0 {
            return Err(CadastroError::config("Queue depth must be greater than 0"));
        }
        if self.writer_concurrency == 0 {
            return Err(CadastroError::config("Writer concurrency must be greater than 0"));
        }
        Ok(())
    }
}

/// Reconciliation settings
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileConfig {
    pub page_size: i64,
    /// Also recompute `customers.status_cpf`, which ingestion always sets to
    /// `valid`.
    pub recompute_cpf_status: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_RECONCILE_PAGE_SIZE,
            recompute_cpf_status: false,
        }
    }
}

impl ReconcileConfig {
    /// Read `RECONCILE_*` variables over the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            page_size: env_parse("RECONCILE_PAGE_SIZE")?.unwrap_or(defaults.page_size),
            recompute_cpf_status: env_flag("RECONCILE_CPF_STATUS")
                .unwrap_or(defaults.recompute_cpf_status),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size <= 0 {
            return Err(CadastroError::config("Reconcile page size must be greater than 0"));
        }
        Ok(())
    }
}

/// Everything the binary needs to run
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DbConfig,
    pub ingest: IngestConfig,
    pub reconcile: ReconcileConfig,
}

impl AppConfig {
    /// Load `.env` (if present) and read every section from the environment.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DbConfig::from_env()?,
            ingest: IngestConfig::from_env()?,
            reconcile: ReconcileConfig::from_env()?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "INGEST_FILE",
            "INGEST_BATCH_SIZE",
            "INGEST_QUEUE_DEPTH",
            "INGEST_WRITER_CONCURRENCY",
            "RECONCILE_PAGE_SIZE",
            "RECONCILE_CPF_STATUS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_ingest_defaults() {
        clear_env();
        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.file, PathBuf::from("./assets/base_teste.txt"));
        assert_eq!(config.batch_size, 50_000);
        assert_eq!(config.queue_depth, 2);
        assert_eq!(config.writer_concurrency, 1);
    }

    #[test]
    #[serial]
    fn test_ingest_from_env() {
        clear_env();
        std::env::set_var("INGEST_FILE", "/data/base.csv");
        std::env::set_var("INGEST_BATCH_SIZE", "1000");
        std::env::set_var("INGEST_WRITER_CONCURRENCY", "4");

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.file, PathBuf::from("/data/base.csv"));
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.writer_concurrency, 4);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_ingest_rejects_garbage_and_zero() {
        clear_env();
        std::env::set_var("INGEST_BATCH_SIZE", "lots");
        let err = IngestConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("INGEST_BATCH_SIZE"));

        std::env::set_var("INGEST_BATCH_SIZE", "0");
        assert!(IngestConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_reconcile_from_env() {
        clear_env();
        let config = ReconcileConfig::from_env().unwrap();
        assert_eq!(config.page_size, 10_000);
        assert!(!config.recompute_cpf_status);

        std::env::set_var("RECONCILE_PAGE_SIZE", "250");
        std::env::set_var("RECONCILE_CPF_STATUS", "true");
        let config = ReconcileConfig::from_env().unwrap();
        assert_eq!(config.page_size, 250);
        assert!(config.recompute_cpf_status);

        clear_env();
    }

    #[test]
    fn test_reconcile_rejects_non_positive_page() {
        let config = ReconcileConfig {
            page_size: 0,
            ..ReconcileConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
