use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::error::ConfigError;
use crate::pipeline::impute::FillPolicy;
use crate::pipeline::normalize::normalize_column;
use crate::types::ColumnType;

/// What to do with the rest of a batch after a per-row store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnStoreError {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Columns that together identify a record. Required.
    pub key_columns: Vec<String>,
    pub table_name: String,
    pub default_fill_policy: FillPolicy,
    /// Overrides for inferred column types
    pub column_types: HashMap<String, ColumnType>,
    pub source_identifier_column: String,
    pub ingestion_date_column: String,
    pub on_store_error: OnStoreError,
    pub database_path: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            key_columns: Vec::new(),
            table_name: constants::DEFAULT_TABLE_NAME.to_string(),
            default_fill_policy: FillPolicy::default(),
            column_types: HashMap::new(),
            source_identifier_column: constants::DEFAULT_SOURCE_COLUMN.to_string(),
            ingestion_date_column: constants::DEFAULT_DATE_COLUMN.to_string(),
            on_store_error: OnStoreError::default(),
            database_path: PathBuf::from(constants::DEFAULT_DATABASE_PATH),
        }
    }
}

impl IngestConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: IngestConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Puts every configured column name in normalized form and checks the
    /// result is usable. Key columns may be written the way they appear in the
    /// source ("Smith A") and still match the normalized rows.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        let canonical = |what: &str, name: &str| -> Result<String, ConfigError> {
            let n = normalize_column(name);
            if n.is_empty() {
                return Err(ConfigError::Invalid(format!("{} '{}' is empty after normalization", what, name)));
            }
            Ok(n)
        };

        if self.key_columns.is_empty() {
            return Err(ConfigError::Invalid("key_columns must name at least one column".into()));
        }
        self.key_columns = self
            .key_columns
            .iter()
            .map(|c| canonical("key column", c))
            .collect::<Result<_, _>>()?;
        for (i, c) in self.key_columns.iter().enumerate() {
            if self.key_columns[..i].contains(c) {
                return Err(ConfigError::Invalid(format!("key column '{}' listed twice", c)));
            }
        }

        self.table_name = canonical("table_name", &self.table_name)?;
        self.source_identifier_column = canonical("source_identifier_column", &self.source_identifier_column)?;
        self.ingestion_date_column = canonical("ingestion_date_column", &self.ingestion_date_column)?;
        if self.source_identifier_column == self.ingestion_date_column {
            return Err(ConfigError::Invalid(
                "source_identifier_column and ingestion_date_column must differ".into(),
            ));
        }

        self.column_types = self
            .column_types
            .iter()
            .map(|(name, ty)| Ok((canonical("column_types entry", name)?, *ty)))
            .collect::<Result<_, ConfigError>>()?;

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::impute::FillValue;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::from_toml("key_columns = [\"id\"]").unwrap().validated().unwrap();
        assert_eq!(config.table_name, "records");
        assert_eq!(config.source_identifier_column, "source_file");
        assert_eq!(config.ingestion_date_column, "import_date");
        assert_eq!(config.on_store_error, OnStoreError::Abort);
        assert_eq!(config.default_fill_policy, FillPolicy::default());
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            key_columns = ["Source File", "import_date", "Smith A"]
            table_name = "TGMMH"
            on_store_error = "continue"
            database_path = "data/ingest.db"

            [default_fill_policy]
            number = -1
            text = "unknown"

            [column_types]
            "Smith A" = "text"
        "#;
        let config = IngestConfig::from_toml(toml).unwrap().validated().unwrap();
        assert_eq!(config.key_columns, vec!["source_file", "import_date", "smith_a"]);
        assert_eq!(config.table_name, "tgmmh");
        assert_eq!(config.on_store_error, OnStoreError::Continue);
        assert_eq!(config.database_path, PathBuf::from("data/ingest.db"));
        assert_eq!(config.default_fill_policy.number, FillValue::Number(-1.0));
        assert_eq!(config.column_types.get("smith_a"), Some(&ColumnType::Text));
    }

    #[test]
    fn test_key_columns_required() {
        let err = IngestConfig::from_toml("").unwrap().validated().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_duplicate_key_column_rejected() {
        let err = IngestConfig::from_toml("key_columns = [\"Smith A\", \"smith_a\"]")
            .unwrap()
            .validated()
            .unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_unknown_error_policy_rejected() {
        assert!(IngestConfig::from_toml("key_columns = [\"a\"]\non_store_error = \"retry\"").is_err());
    }
}
