//! Persistence writer
//!
//! A batch is written in two steps. First every distinct store CNPJ the batch
//! references is looked up and, when missing, created with both status flags
//! `invalid`; failures here are recorded as [`StoreFailure`] values and logged,
//! never returned. Then customers and transactions are inserted inside one
//! database transaction, each table with a single `UNNEST` statement, customers
//! first so every transaction row finds its owner at commit.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, warn};

use cadastro_common::DocumentStatus;

use super::batch::Batch;

/// Failure submitting the customer/transaction part of a batch
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Batch {sequence}: {stage} failed: {source}")]
    Statement {
        sequence: u64,
        stage: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl WriteError {
    fn statement(sequence: u64, stage: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| WriteError::Statement {
            sequence,
            stage,
            source,
        }
    }
}

/// Which half of the store lookup-or-create failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStage {
    Lookup,
    Insert,
}

impl StoreStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStage::Lookup => "lookup",
            StoreStage::Insert => "insert",
        }
    }
}

/// A swallowed store side-effect failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreFailure {
    pub cnpj: String,
    pub stage: StoreStage,
    pub message: String,
}

/// Outcome of one successfully written batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub customers_submitted: u64,
    /// Rows actually inserted; the rest collided with an existing CPF.
    pub customers_inserted: u64,
    pub transactions_inserted: u64,
    pub stores_created: u64,
    pub store_failures: Vec<StoreFailure>,
}

/// Destination for completed batches
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn write(&self, batch: Batch) -> Result<BatchReport, WriteError>;
}

/// Distinct store CNPJs in first-occurrence order
pub fn distinct_store_references(batch: &Batch) -> Vec<&str> {
    let mut seen = HashSet::new();
    batch
        .records
        .iter()
        .flat_map(|record| record.store_references())
        .filter(|cnpj| seen.insert(*cnpj))
        .collect()
}

/// Postgres-backed [`BatchSink`]
#[derive(Clone)]
pub struct PgBatchWriter {
    pool: PgPool,
}

impl PgBatchWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up `cnpj`, creating a placeholder row when absent.
    ///
    /// Returns whether a row was created.
    async fn ensure_store(&self, cnpj: &str) -> Result<bool, StoreFailure> {
        let failure = |stage: StoreStage, err: sqlx::Error| StoreFailure {
            cnpj: cnpj.to_string(),
            stage,
            message: err.to_string(),
        };

        let existing: Option<i32> = sqlx::query_scalar("SELECT id FROM stores WHERE cnpj = $1")
            .bind(cnpj)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| failure(StoreStage::Lookup, e))?;

        if existing.is_some() {
            return Ok(false);
        }

        let placeholder = DocumentStatus::Invalid.as_str();
        let result = sqlx::query(
            r#"
            INSERT INTO stores (cnpj, status_for_last_store, status_for_frequent_store)
            VALUES ($1, $2, $2)
            ON CONFLICT (cnpj) DO NOTHING
            "#,
        )
        .bind(cnpj)
        .bind(placeholder)
        .execute(&self.pool)
        .await
        .map_err(|e| failure(StoreStage::Insert, e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn ensure_stores(&self, batch: &Batch) -> (u64, Vec<StoreFailure>) {
        let mut created = 0;
        let mut failures = Vec::new();

        for cnpj in distinct_store_references(batch) {
            match self.ensure_store(cnpj).await {
                Ok(true) => created += 1,
                Ok(false) => {},
                Err(failure) => {
                    warn!(
                        batch = batch.sequence,
                        cnpj = %failure.cnpj,
                        stage = failure.stage.as_str(),
                        error = %failure.message,
                        "Store lookup-or-create failed; continuing"
                    );
                    failures.push(failure);
                },
            }
        }

        (created, failures)
    }
}

/// Customer insert, in `cpf` order so concurrent batches sharing CPFs take
/// the unique-index locks in the same order. `ord` keeps the first
/// occurrence of a duplicate CPF within the batch.
const INSERT_CUSTOMERS: &str = r#"
    INSERT INTO customers (
        cpf, private, incomplete, status_cpf,
        most_frequent_store_cnpj, last_store_cnpj
    )
    SELECT u.cpf, u.private, u.incomplete, $4, u.most_frequent, u.last
    FROM UNNEST($1::text[], $2::bool[], $3::bool[], $5::text[], $6::text[])
        WITH ORDINALITY AS u(cpf, private, incomplete, most_frequent, last, ord)
    ORDER BY u.cpf, u.ord
    ON CONFLICT (cpf) DO NOTHING
"#;

/// Column vectors for the `UNNEST` inserts
#[derive(Default)]
struct Columns {
    cpf: Vec<String>,
    private: Vec<bool>,
    incomplete: Vec<bool>,
    most_frequent_store: Vec<Option<String>>,
    last_store: Vec<Option<String>>,
    last_purchase_date: Vec<Option<NaiveDate>>,
    average_ticket: Vec<Option<f64>>,
    last_ticket: Vec<Option<f64>>,
}

impl Columns {
    fn from_batch(batch: &Batch) -> Self {
        let mut columns = Columns::default();
        for record in &batch.records {
            columns.cpf.push(record.cpf.clone());
            columns.private.push(record.private);
            columns.incomplete.push(record.incomplete);
            columns.most_frequent_store.push(record.most_frequent_store.clone());
            columns.last_store.push(record.last_store.clone());
            columns.last_purchase_date.push(record.last_purchase_date);
            columns.average_ticket.push(record.average_ticket);
            columns.last_ticket.push(record.last_ticket);
        }
        columns
    }
}

#[async_trait]
impl BatchSink for PgBatchWriter {
    async fn write(&self, batch: Batch) -> Result<BatchReport, WriteError> {
        let sequence = batch.sequence;
        let (stores_created, store_failures) = self.ensure_stores(&batch).await;

        let columns = Columns::from_batch(&batch);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(WriteError::statement(sequence, "begin"))?;

        let customers = sqlx::query(INSERT_CUSTOMERS)
            .bind(&columns.cpf)
            .bind(&columns.private)
            .bind(&columns.incomplete)
            .bind(DocumentStatus::Valid.as_str())
            .bind(&columns.most_frequent_store)
            .bind(&columns.last_store)
            .execute(&mut *tx)
            .await
            .map_err(WriteError::statement(sequence, "customer insert"))?;

        let transactions = sqlx::query(
            r#"
            INSERT INTO transactions (cpf, last_purchase_date, average_ticket, last_ticket)
            SELECT * FROM UNNEST($1::text[], $2::date[], $3::float8[], $4::float8[])
            "#,
        )
        .bind(&columns.cpf)
        .bind(&columns.last_purchase_date)
        .bind(&columns.average_ticket)
        .bind(&columns.last_ticket)
        .execute(&mut *tx)
        .await
        .map_err(WriteError::statement(sequence, "transaction insert"))?;

        tx.commit()
            .await
            .map_err(WriteError::statement(sequence, "commit"))?;

        debug!(
            batch = sequence,
            customers = customers.rows_affected(),
            transactions = transactions.rows_affected(),
            "Batch committed"
        );

        Ok(BatchReport {
            customers_submitted: batch.len() as u64,
            customers_inserted: customers.rows_affected(),
            transactions_inserted: transactions.rows_affected(),
            stores_created,
            store_failures,
        })
    }
}
