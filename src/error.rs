use std::path::PathBuf;
use thiserror::Error;

/// The source document could not be read. Always fatal, raised before the
/// store is touched.
#[derive(Error, Debug)]
pub enum SourceReadError {
    #[error("Source not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sheet '{subset}' not found (available: {})", .available.join(", "))]
    SubsetNotFound {
        subset: String,
        available: Vec<String>,
    },

    #[error("Source has no header row")]
    NoHeader,
}

/// The column layout cannot be ingested. Fatal, raised before any insert.
#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("Columns '{first}' and '{second}' both normalize to '{normalized}'")]
    Collision {
        first: String,
        second: String,
        normalized: String,
    },

    #[error("Column '{original}' normalizes to an empty name")]
    EmptyColumnName { original: String },

    #[error("Key column '{0}' is not present in the rows")]
    MissingKeyColumn(String),

    #[error("Source column '{0}' clashes with a provenance column")]
    ProvenanceCollision(String),

    #[error("No key columns configured")]
    NoKeyColumns,

    #[error("Key column '{0}' is listed more than once")]
    DuplicateKeyColumn(String),

    #[error("Source identifier and ingestion date would both be stored in column '{0}'")]
    ProvenanceColumnsEqual(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The uniqueness constraint rejected an insert that a concurrent writer
    /// beat us to. Callers treat this as a skip.
    #[error("Duplicate key rejected by constraint on table '{table}'")]
    DuplicateKeyRace { table: String },

    #[error("Table '{table}' exists but lacks columns: {}", .missing.join(", "))]
    TableMismatch { table: String, missing: Vec<String> },

    #[error("Unknown table '{0}'")]
    UnknownTable(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceReadError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
