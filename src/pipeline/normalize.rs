use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::error::SchemaError;
use crate::types::{RecordSet, Row};

static NON_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("static pattern is valid"));

/// Canonicalizes one column name: trim, spaces to underscores, drop anything
/// outside `[A-Za-z0-9_]`, lowercase. The order of the steps matters.
pub fn normalize_column(name: &str) -> String {
    let trimmed = name.trim();
    let underscored = trimmed.replace(' ', "_");
    let stripped = NON_IDENTIFIER.replace_all(&underscored, "");
    stripped.to_lowercase()
}

/// Normalizes a header. Fails if a name normalizes to nothing or if two input
/// columns land on the same normalized name.
pub fn normalize_columns<S: AsRef<str>>(columns: &[S]) -> Result<Vec<String>, SchemaError> {
    let mut seen: HashMap<String, &str> = HashMap::with_capacity(columns.len());
    let mut out = Vec::with_capacity(columns.len());

    for original in columns {
        let original = original.as_ref();
        let normalized = normalize_column(original);
        if normalized.is_empty() {
            return Err(SchemaError::EmptyColumnName {
                original: original.to_string(),
            });
        }
        if let Some(first) = seen.get(&normalized) {
            return Err(SchemaError::Collision {
                first: first.to_string(),
                second: original.to_string(),
                normalized,
            });
        }
        seen.insert(normalized.clone(), original);
        out.push(normalized);
    }

    Ok(out)
}

/// Renames the columns of every row to their normalized names.
pub fn normalize_record_set(records: &RecordSet) -> Result<RecordSet, SchemaError> {
    let columns = normalize_columns(records.columns())?;
    Ok(records.map_rows(columns.clone(), |row| {
        Row::new(
            columns
                .iter()
                .cloned()
                .zip(row.values().cloned())
                .collect(),
        )
    }))
}
