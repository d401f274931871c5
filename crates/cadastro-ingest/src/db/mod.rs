//! Database pool and schema bootstrap

pub mod schema;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

use cadastro_common::CadastroError;

use crate::config::env_parse;

pub use schema::create_tables;

/// Default maximum connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default minimum connections kept open.
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Default connection acquire timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Database setup errors. Every variant is fatal to the process.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQL query or connection error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Database configuration is invalid or missing
    #[error("Database configuration error: {0}. Check DATABASE_URL and connection settings.")]
    Config(String),

    /// A DDL statement failed
    #[error("Failed to create table {table}: {source}")]
    Schema {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl DbError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<CadastroError> for DbError {
    fn from(err: CadastroError) -> Self {
        match err {
            CadastroError::Config(message) => Self::Config(message),
            other => Self::Config(other.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: None,
            max_lifetime_secs: None,
        }
    }
}

impl DbConfig {
    /// Read `DATABASE_URL` and the `DB_*` pool settings.
    ///
    /// A missing `DATABASE_URL` is an error; every other setting has a default.
    /// A set but unparsable value is an error too.
    pub fn from_env() -> DbResult<Self> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| DbError::Config("DATABASE_URL not set".to_string()))?;

        let max_connections =
            env_parse("DB_MAX_CONNECTIONS")?.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let min_connections =
            env_parse("DB_MIN_CONNECTIONS")?.unwrap_or(DEFAULT_MIN_CONNECTIONS);
        let connect_timeout_secs =
            env_parse("DB_CONNECT_TIMEOUT")?.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        let idle_timeout_secs = env_parse("DB_IDLE_TIMEOUT")?;
        let max_lifetime_secs = env_parse("DB_MAX_LIFETIME")?;

        let config = Self {
            url,
            max_connections,
            min_connections,
            connect_timeout_secs,
            idle_timeout_secs,
            max_lifetime_secs,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.url.trim().is_empty() {
            return Err(DbError::config("DATABASE_URL cannot be empty"));
        }

        if self.max_connections == 0 {
            return Err(DbError::config("DB_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.min_connections > self.max_connections {
            return Err(DbError::config(format!(
                "DB_MIN_CONNECTIONS ({}) cannot be greater than DB_MAX_CONNECTIONS ({})",
                self.min_connections, self.max_connections
            )));
        }

        Ok(())
    }
}

pub async fn create_pool(config: &DbConfig) -> DbResult<PgPool> {
    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    if let Some(max_lifetime) = config.max_lifetime_secs {
        options = options.max_lifetime(Duration::from_secs(max_lifetime));
    }

    let pool = options.connect(&config.url).await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(DbError::from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "DB_MAX_CONNECTIONS",
            "DB_MIN_CONNECTIONS",
            "DB_CONNECT_TIMEOUT",
            "DB_IDLE_TIMEOUT",
            "DB_MAX_LIFETIME",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout_secs, 30);
        assert!(config.idle_timeout_secs.is_none());
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgresql://localhost/cadastro_test");
        std::env::set_var("DB_MAX_CONNECTIONS", "15");
        std::env::set_var("DB_IDLE_TIMEOUT", "60");

        let config = DbConfig::from_env().unwrap();
        assert_eq!(config.max_connections, 15);
        assert_eq!(config.idle_timeout_secs, Some(60));
        assert!(config.url.contains("cadastro_test"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_from_env_missing_url() {
        clear_env();
        let result = DbConfig::from_env();
        assert!(matches!(result, Err(DbError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_config_rejects_min_above_max() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgresql://localhost/cadastro_test");
        std::env::set_var("DB_MAX_CONNECTIONS", "2");
        std::env::set_var("DB_MIN_CONNECTIONS", "5");

        let err = DbConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("DB_MIN_CONNECTIONS"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_rejects_unparsable_values() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgresql://localhost/cadastro_test");
        std::env::set_var("DB_MAX_CONNECTIONS", "abc");

        let err = DbConfig::from_env().unwrap_err();
        assert!(matches!(err, DbError::Config(_)));
        assert!(err.to_string().contains("DB_MAX_CONNECTIONS"));

        std::env::set_var("DB_MAX_CONNECTIONS", "5");
        std::env::set_var("DB_IDLE_TIMEOUT", "soon");
        assert!(DbConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let config = DbConfig {
            url: "  ".to_string(),
            ..DbConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
