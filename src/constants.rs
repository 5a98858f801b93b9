// Defaults shared by configuration and the command line

pub const DEFAULT_TABLE_NAME: &str = "records";
pub const DEFAULT_SOURCE_COLUMN: &str = "source_file";
pub const DEFAULT_DATE_COLUMN: &str = "import_date";
pub const DEFAULT_DATABASE_PATH: &str = "data/ingest.db";
pub const DEFAULT_CONFIG_PATH: &str = "ingest.toml";

/// Environment variable overriding the configured database path
pub const DATABASE_ENV_VAR: &str = "SHEET_INGEST_DB";
