use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

use sheet_ingest::constants;
use sheet_ingest::logging;
use sheet_ingest::pipeline::normalize::normalize_column;
use sheet_ingest::source::reader_for;
use sheet_ingest::store::{SqliteStore, Store};
use sheet_ingest::{IngestConfig, IngestReport, IngestRequest, OnStoreError, Pipeline, RunStatus};

#[derive(Parser)]
#[command(name = "sheet-ingest")]
#[command(about = "Duplicate-aware spreadsheet ingestion into SQLite")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration (default: ingest.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and SHEET_INGEST_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest one sheet of a document into the keyed table
    Ingest {
        /// Spreadsheet or CSV file to read
        location: PathBuf,
        /// Sheet name within the workbook
        #[arg(long, default_value = "Sheet1")]
        sheet: String,
        /// Key columns (comma-separated), replacing the configured list
        #[arg(long, value_delimiter = ',')]
        key_columns: Option<Vec<String>>,
        /// Target table name
        #[arg(long)]
        table: Option<String>,
        /// Source identifier to stamp (default: file name)
        #[arg(long)]
        source_id: Option<String>,
        /// Ingestion date to stamp, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Keep going after a row fails to persist
        #[arg(long)]
        continue_on_error: bool,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Count the records stored in a table
    Count {
        #[arg(long)]
        table: Option<String>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<IngestConfig> {
    match path {
        Some(p) => Ok(IngestConfig::load(p)?),
        None if Path::new(constants::DEFAULT_CONFIG_PATH).exists() => {
            Ok(IngestConfig::load(constants::DEFAULT_CONFIG_PATH)?)
        }
        None => Ok(IngestConfig::default()),
    }
}

fn database_path(cli_db: Option<PathBuf>, config: &IngestConfig) -> PathBuf {
    cli_db
        .or_else(|| std::env::var(constants::DATABASE_ENV_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| config.database_path.clone())
}

fn print_report(report: &IngestReport) {
    println!("\n📊 Ingestion results for {} -> {}:", report.source_id, report.table);
    println!("   Run id: {}", report.run_id);
    println!("   Ingestion date: {}", report.ingestion_date);
    println!("   Total rows: {}", report.total_rows);
    println!("   Inserted: {}", report.inserted);
    println!("   Skipped (duplicates): {}", report.skipped);
    println!("   Failed: {}", report.failed.len());
    println!("   Not attempted: {}", report.not_attempted);

    if !report.failed.is_empty() {
        println!("\n⚠️  Rows that failed to persist:");
        for failure in &report.failed {
            println!("   - row {} {}: {}", failure.row, failure.key, failure.error);
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging("logs")?;

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    let db_path = database_path(cli.db, &config);

    match cli.command {
        Commands::Ingest {
            location,
            sheet,
            key_columns,
            table,
            source_id,
            date,
            continue_on_error,
            json,
        } => {
            if let Some(keys) = key_columns {
                config.key_columns = keys;
            }
            if let Some(table) = table {
                config.table_name = table;
            }
            if continue_on_error {
                config.on_store_error = OnStoreError::Continue;
            }
            let config = config.validated()?;

            let mut request = IngestRequest::new(location, sheet);
            request.source_id = source_id;
            request.ingestion_date = date;

            let reader = reader_for(&request.location)?;
            let mut store = SqliteStore::open(&db_path)
                .with_context(|| format!("opening database {}", db_path.display()))?;
            info!(db = %db_path.display(), "Opened store");

            let report = match Pipeline::new(&config).run(reader.as_ref(), &request, &mut store) {
                Ok(report) => report,
                Err(e) => {
                    error!("Ingestion aborted: {}", e);
                    eprintln!("❌ Ingestion aborted: {}", e);
                    return Ok(ExitCode::FAILURE);
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }

            Ok(match report.status {
                RunStatus::Complete => ExitCode::SUCCESS,
                RunStatus::Partial | RunStatus::Cancelled => ExitCode::from(2),
            })
        }
        Commands::Count { table } => {
            let table = normalize_column(table.as_deref().unwrap_or(&config.table_name));
            let mut store = SqliteStore::open(&db_path)
                .with_context(|| format!("opening database {}", db_path.display()))?;
            let n = store.count(&table)?;
            println!("{}", n);
            Ok(ExitCode::SUCCESS)
        }
    }
}
