//! Batch ingestion pipeline
//!
//! A reader task turns file lines into [`CustomerRecord`]s and packs them
//! into [`Batch`]es, handing each one over a bounded channel. The writer
//! stage drains the channel into a [`BatchSink`], running up to
//! `writer_concurrency` batch writes at once. Within a batch every customer
//! row is written before any transaction row; across batches no commit order
//! is promised once concurrency exceeds one.
//!
//! The first failure ends the run. A bad row stops the reader (batches it
//! already handed over are still written); a failed write stops both sides.

pub mod batch;
pub mod reader;
pub mod record;
pub mod writer;

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use crate::config::IngestConfig;

pub use batch::{Batch, BatchBuffer};
pub use reader::{split_fields, Delimiter, RowReader};
pub use record::{transform_row, CustomerRecord, RowError, FIELD_COUNT};
pub use writer::{BatchReport, BatchSink, PgBatchWriter, StoreFailure, StoreStage, WriteError};

/// Why an ingestion run stopped early
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to open input file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Row(#[from] RowError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("Ingestion aborted: {0}")]
    Aborted(String),
}

/// Counters for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub lines_read: u64,
    pub records: u64,
    pub batches: u64,
    pub customers_submitted: u64,
    pub customers_inserted: u64,
    pub transactions_inserted: u64,
    pub stores_created: u64,
    pub store_failures: u64,
}

impl IngestStats {
    fn absorb(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.customers_submitted += report.customers_submitted;
        self.customers_inserted += report.customers_inserted;
        self.transactions_inserted += report.transactions_inserted;
        self.stores_created += report.stores_created;
        self.store_failures += report.store_failures.len() as u64;
    }
}

#[derive(Debug, Default)]
struct ReadStats {
    lines_read: u64,
    records: u64,
}

/// Read the file and send full batches downstream.
async fn produce(
    mut reader: RowReader,
    batch_size: usize,
    tx: mpsc::Sender<Batch>,
) -> Result<ReadStats, IngestError> {
    let delimiter = reader.delimiter();
    let mut buffer = BatchBuffer::new(batch_size);
    let mut stats = ReadStats::default();

    while let Some((index, line)) = reader.next_line().await? {
        stats.lines_read += 1;

        let fields = split_fields(&line, delimiter);
        if index > 0 && fields.is_empty() {
            continue;
        }

        let Some(record) = transform_row(&fields, index)? else {
            continue;
        };
        stats.records += 1;

        if let Some(batch) = buffer.push(index + 1, record) {
            if tx.send(batch).await.is_err() {
                // Writer side is gone; its error is the one reported.
                return Ok(stats);
            }
        }
    }

    if let Some(batch) = buffer.flush() {
        let _ = tx.send(batch).await;
    }

    Ok(stats)
}

/// Ingest `config.file` into `sink`.
pub async fn ingest_file(
    config: &IngestConfig,
    sink: Arc<dyn BatchSink>,
) -> Result<IngestStats, IngestError> {
    let reader = RowReader::open(&config.file).await?;

    info!(
        file = %reader.path().display(),
        delimiter = ?reader.delimiter(),
        batch_size = config.batch_size,
        queue_depth = config.queue_depth,
        writer_concurrency = config.writer_concurrency,
        "Starting ingestion"
    );

    let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
    let producer = tokio::spawn(produce(reader, config.batch_size, tx));

    let mut stats = IngestStats::default();
    let mut writes = ReceiverStream::new(rx)
        .map(|batch| {
            let sink = Arc::clone(&sink);
            async move {
                let span = (batch.sequence, batch.first_line, batch.last_line);
                (span, sink.write(batch).await)
            }
        })
        .buffer_unordered(config.writer_concurrency.max(1));

    while let Some(((sequence, first_line, last_line), result)) = writes.next().await {
        match result {
            Ok(report) => {
                info!(
                    batch = sequence,
                    first_line,
                    last_line,
                    customers = report.customers_submitted,
                    customers_inserted = report.customers_inserted,
                    transactions = report.transactions_inserted,
                    stores_created = report.stores_created,
                    store_failures = report.store_failures.len(),
                    "Batch flushed"
                );
                stats.absorb(&report);
            },
            Err(err) => {
                error!(batch = sequence, first_line, last_line, error = %err, "Batch write failed");
                producer.abort();
                return Err(err.into());
            },
        }
    }

    let read = producer
        .await
        .map_err(|e| IngestError::Aborted(format!("reader task failed: {}", e)))?
        .inspect_err(|err| {
            if let IngestError::Row(row) = err {
                error!(line = row.line(), error = %row, "Rejected input row");
            }
        })?;

    stats.lines_read = read.lines_read;
    stats.records = read.records;

    info!(
        lines = stats.lines_read,
        records = stats.records,
        batches = stats.batches,
        customers_inserted = stats.customers_inserted,
        transactions = stats.transactions_inserted,
        stores_created = stats.stores_created,
        store_failures = stats.store_failures,
        "Ingestion complete"
    );

    Ok(stats)
}

/// Ingest `config.file` into the database behind `pool`.
pub async fn run_ingestion(pool: &PgPool, config: &IngestConfig) -> Result<IngestStats, IngestError> {
    let sink: Arc<dyn BatchSink> = Arc::new(PgBatchWriter::new(pool.clone()));
    ingest_file(config, sink).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;

    const HEADER: &str = "CPF\tPRIVATE\tINCOMPLETO\tDATA DA ULTIMA COMPRA\tTICKET MEDIO\tTICKET DA ULTIMA COMPRA\tLOJA MAIS FREQUENTE\tLOJA DA ULTIMA COMPRA";

    #[derive(Default)]
    struct MemorySink {
        batches: Mutex<Vec<Batch>>,
        fail_on: Option<u64>,
    }

    impl MemorySink {
        fn failing_on(sequence: u64) -> Self {
            Self {
                fail_on: Some(sequence),
                ..Default::default()
            }
        }

        fn written(&self) -> Vec<Batch> {
            let mut batches = self.batches.lock().unwrap().clone();
            batches.sort_by_key(|b| b.sequence);
            batches
        }
    }

    #[async_trait]
    impl BatchSink for MemorySink {
        async fn write(&self, batch: Batch) -> Result<BatchReport, WriteError> {
            if self.fail_on == Some(batch.sequence) {
                return Err(WriteError::Statement {
                    sequence: batch.sequence,
                    stage: "customer insert",
                    source: sqlx::Error::PoolTimedOut,
                });
            }

            let report = BatchReport {
                customers_submitted: batch.len() as u64,
                customers_inserted: batch.len() as u64,
                transactions_inserted: batch.len() as u64,
                ..Default::default()
            };
            self.batches.lock().unwrap().push(batch);
            Ok(report)
        }
    }

    fn data_row(cpf: &str) -> String {
        format!("{cpf}\t0\t0\t2013-05-13\t12,50\t399,90\t79.379.491/0008-50\t79.379.491/0001-83")
    }

    fn input_file(rows: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn config_for(file: &tempfile::NamedTempFile, batch_size: usize, writer_concurrency: usize) -> IngestConfig {
        IngestConfig {
            file: file.path().to_path_buf(),
            batch_size,
            queue_depth: 1,
            writer_concurrency,
        }
    }

    fn cpfs(batch: &Batch) -> Vec<&str> {
        batch.records.iter().map(|r| r.cpf.as_str()).collect()
    }

    #[tokio::test]
    async fn test_batches_preserve_source_order() {
        let rows: Vec<String> = (1..=5).map(|i| data_row(&format!("cpf{i}"))).collect();
        let file = input_file(&rows);
        let sink = Arc::new(MemorySink::default());

        let stats = ingest_file(&config_for(&file, 2, 1), sink.clone()).await.unwrap();

        assert_eq!(stats.lines_read, 6);
        assert_eq!(stats.records, 5);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.customers_submitted, 5);

        let written = sink.written();
        assert_eq!(cpfs(&written[0]), vec!["cpf1", "cpf2"]);
        assert_eq!(cpfs(&written[1]), vec!["cpf3", "cpf4"]);
        assert_eq!(cpfs(&written[2]), vec!["cpf5"]);
        assert_eq!((written[0].first_line, written[0].last_line), (2, 3));
    }

    #[tokio::test]
    async fn test_concurrent_writers_write_every_batch() {
        let rows: Vec<String> = (1..=7).map(|i| data_row(&format!("cpf{i}"))).collect();
        let file = input_file(&rows);
        let sink = Arc::new(MemorySink::default());

        let stats = ingest_file(&config_for(&file, 2, 3), sink.clone()).await.unwrap();

        assert_eq!(stats.batches, 4);
        let sequences: Vec<u64> = sink.written().iter().map(|b| b.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_header_only_file() {
        let file = input_file(&[]);
        let sink = Arc::new(MemorySink::default());

        let stats = ingest_file(&config_for(&file, 10, 1), sink.clone()).await.unwrap();

        assert_eq!(stats.lines_read, 1);
        assert_eq!(stats.records, 0);
        assert!(sink.written().is_empty());
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let rows = vec![data_row("a"), String::new(), "   ".to_string(), data_row("b")];
        let file = input_file(&rows);
        let sink = Arc::new(MemorySink::default());

        let stats = ingest_file(&config_for(&file, 10, 1), sink.clone()).await.unwrap();

        assert_eq!(stats.records, 2);
        assert_eq!(cpfs(&sink.written()[0]), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_bad_row_stops_ingestion() {
        let rows = vec![
            data_row("a"),
            data_row("b"),
            "c\t0\t0".to_string(),
            data_row("d"),
        ];
        let file = input_file(&rows);
        let sink = Arc::new(MemorySink::default());

        let err = ingest_file(&config_for(&file, 2, 1), sink.clone()).await.unwrap_err();

        match err {
            IngestError::Row(row) => {
                assert_eq!(row.line(), 4);
                assert!(matches!(row, RowError::Shape { found: 3, .. }));
            },
            other => panic!("unexpected error: {other:?}"),
        }

        // The batch completed before the bad row is still written.
        let written = sink.written();
        assert_eq!(written.len(), 1);
        assert_eq!(cpfs(&written[0]), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_write_failure_aborts_run() {
        let rows: Vec<String> = (1..=6).map(|i| data_row(&format!("cpf{i}"))).collect();
        let file = input_file(&rows);
        let sink = Arc::new(MemorySink::failing_on(2));

        let err = ingest_file(&config_for(&file, 2, 1), sink.clone()).await.unwrap_err();

        assert!(matches!(err, IngestError::Write(WriteError::Statement { sequence: 2, .. })));
        assert!(sink.written().iter().all(|b| b.sequence != 2));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let config = IngestConfig {
            file: PathBuf::from("/no/such/base_teste.txt"),
            ..IngestConfig::default()
        };
        let sink = Arc::new(MemorySink::default());

        let err = ingest_file(&config, sink).await.unwrap_err();
        assert!(matches!(err, IngestError::Open { .. }));
    }
}
