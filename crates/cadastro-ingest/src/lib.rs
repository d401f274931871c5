//! Cadastro Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads customer/transaction exports into Postgres and reconciles the
//! CPF/CNPJ status flags afterwards.
//!
//! # Modules
//!
//! - **pipeline**: file reader, row transformer, batch buffer and writer
//! - **reconcile**: post-load status pass
//! - **db**: connection pool and table bootstrap
//! - **config**: environment-driven settings
//!
//! # Example
//!
//! ```no_run
//! use cadastro_ingest::config::AppConfig;
//! use cadastro_ingest::{db, pipeline, reconcile};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     db::create_tables(&pool).await?;
//!
//!     pipeline::run_ingestion(&pool, &config.ingest).await?;
//!     reconcile::reconcile(&pool, &config.reconcile).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod pipeline;
pub mod reconcile;

pub use pipeline::{IngestError, IngestStats};
pub use reconcile::{ReconcileError, ReconcileStats};
