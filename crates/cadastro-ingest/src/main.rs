//! Cadastro Ingest - customer base loader

use std::path::PathBuf;

use anyhow::Result;
use cadastro_common::document;
use cadastro_common::logging::{init_logging, LogConfig, LogLevel};
use cadastro_common::{DocumentKind, DocumentStatus};
use cadastro_ingest::config::AppConfig;
use cadastro_ingest::{db, pipeline, reconcile, IngestStats, ReconcileStats};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cadastro-ingest")]
#[command(author, version, about = "Customer base ingestion and CPF/CNPJ reconciliation")]
struct Cli {
    /// What to run (defaults to `run`)
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print phase summaries as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args, Debug, Default, Clone)]
struct IngestArgs {
    /// Input file (tab-delimited when it ends in .txt, comma otherwise)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Records per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Batch writes in flight
    #[arg(long)]
    writer_concurrency: Option<usize>,
}

#[derive(Args, Debug, Default, Clone)]
struct ReconcileArgs {
    /// Also recompute customers.status_cpf
    #[arg(long)]
    recompute_cpf_status: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables, ingest the file, then reconcile statuses
    Run {
        #[command(flatten)]
        ingest: IngestArgs,

        #[command(flatten)]
        reconcile: ReconcileArgs,
    },

    /// Create tables and ingest the file
    Ingest {
        #[command(flatten)]
        ingest: IngestArgs,
    },

    /// Create tables and reconcile statuses
    Reconcile {
        #[command(flatten)]
        reconcile: ReconcileArgs,
    },

    /// Check CPF/CNPJ values offline
    Validate {
        /// Values to check
        #[arg(required = true)]
        values: Vec<String>,

        #[arg(short, long, value_enum, default_value_t = KindArg::Auto)]
        kind: KindArg,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum KindArg {
    Cpf,
    Cnpj,
    /// CPF for 11 digits, CNPJ for 14
    Auto,
}

/// What `run`, `ingest` and `reconcile` report
#[derive(Debug, Default, Serialize)]
struct Summary {
    #[serde(skip_serializing_if = "Option::is_none")]
    ingest: Option<IngestStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ingest_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reconcile: Option<ReconcileStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reconcile_error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidationOutcome {
    input: String,
    kind: Option<DocumentKind>,
    status: DocumentStatus,
    formatted: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cadastro-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let command = cli.command.unwrap_or(Command::Run {
        ingest: IngestArgs::default(),
        reconcile: ReconcileArgs::default(),
    });

    let summary = match command {
        Command::Validate { values, kind } => return validate(&values, kind, cli.json),
        Command::Run { ingest, reconcile } => {
            let (config, pool) = bootstrap(Some(&ingest), Some(&reconcile)).await?;
            let mut summary = Summary::default();
            run_ingest(&pool, &config, &mut summary).await;
            run_reconcile(&pool, &config, &mut summary).await;
            summary
        },
        Command::Ingest { ingest } => {
            let (config, pool) = bootstrap(Some(&ingest), None).await?;
            let mut summary = Summary::default();
            run_ingest(&pool, &config, &mut summary).await;
            summary
        },
        Command::Reconcile { reconcile } => {
            let (config, pool) = bootstrap(None, Some(&reconcile)).await?;
            let mut summary = Summary::default();
            run_reconcile(&pool, &config, &mut summary).await;
            summary
        },
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

/// Load configuration, connect, and create tables. Any failure here is fatal.
async fn bootstrap(
    ingest: Option<&IngestArgs>,
    reconcile: Option<&ReconcileArgs>,
) -> Result<(AppConfig, PgPool)> {
    let mut config = AppConfig::load()?;

    if let Some(args) = ingest {
        if let Some(file) = &args.file {
            config.ingest.file = file.clone();
        }
        if let Some(batch_size) = args.batch_size {
            config.ingest.batch_size = batch_size;
        }
        if let Some(writer_concurrency) = args.writer_concurrency {
            config.ingest.writer_concurrency = writer_concurrency;
        }
        config.ingest.validate()?;
    }

    if let Some(args) = reconcile {
        config.reconcile.recompute_cpf_status |= args.recompute_cpf_status;
    }

    let pool = db::create_pool(&config.database).await?;
    db::health_check(&pool).await?;
    db::create_tables(&pool).await?;

    Ok((config, pool))
}

async fn run_ingest(pool: &PgPool, config: &AppConfig, summary: &mut Summary) {
    match pipeline::run_ingestion(pool, &config.ingest).await {
        Ok(stats) => {
            info!(file = %config.ingest.file.display(), "File processed successfully");
            summary.ingest = Some(stats);
        },
        Err(e) => {
            error!(file = %config.ingest.file.display(), error = %e, "File processing failed");
            summary.ingest_error = Some(e.to_string());
        },
    }
}

async fn run_reconcile(pool: &PgPool, config: &AppConfig, summary: &mut Summary) {
    match reconcile::reconcile(pool, &config.reconcile).await {
        Ok(stats) => summary.reconcile = Some(stats),
        Err(e) => {
            error!(error = %e, "Reconciliation failed");
            summary.reconcile_error = Some(e.to_string());
        },
    }
}

fn check(value: &str, kind: KindArg) -> ValidationOutcome {
    let kind = match kind {
        KindArg::Cpf => Some(DocumentKind::Cpf),
        KindArg::Cnpj => Some(DocumentKind::Cnpj),
        KindArg::Auto => DocumentKind::detect(value),
    };

    let formatted = kind.and_then(|k| k.format(value));
    ValidationOutcome {
        input: value.to_string(),
        kind,
        status: DocumentStatus::from_validity(formatted.is_some()),
        formatted,
    }
}

fn validate(values: &[String], kind: KindArg, json: bool) -> Result<()> {
    let outcomes: Vec<ValidationOutcome> = values.iter().map(|v| check(v, kind)).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
        return Ok(());
    }

    for outcome in &outcomes {
        let kind = outcome.kind.map_or("unknown".to_string(), |k| k.to_string());
        match &outcome.formatted {
            Some(formatted) => println!("{}\t{}\t{}\t{}", outcome.input, kind, outcome.status, formatted),
            None => println!(
                "{}\t{}\t{}\t({} digits)",
                outcome.input,
                kind,
                outcome.status,
                document::digits(&outcome.input).len()
            ),
        }
    }

    Ok(())
}
