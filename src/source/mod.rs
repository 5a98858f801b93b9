// Source readers: turn a document location plus a subset (sheet) name into typed rows

pub mod delimited;
pub mod workbook;

pub use delimited::CsvReader;
pub use workbook::WorkbookReader;

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;

use crate::error::SourceReadError;
use crate::types::{RecordSet, Value};

pub trait SourceReader {
    /// Reads the rows of `subset` from the document at `location`, first row
    /// as the header.
    fn read(&self, location: &Path, subset: &str) -> Result<RecordSet, SourceReadError>;
}

/// Picks a reader from the file extension.
pub fn reader_for(location: &Path) -> Result<Box<dyn SourceReader>, SourceReadError> {
    let ext = location
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => Ok(Box::new(WorkbookReader)),
        Some("csv") => Ok(Box::new(CsvReader::default())),
        Some("tsv") => Ok(Box::new(CsvReader::with_delimiter(b'\t'))),
        _ => Err(SourceReadError::UnsupportedFormat(location.to_path_buf())),
    }
}

/// Fixed in-memory sheets, addressed by subset name. The location is ignored.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    sheets: HashMap<String, RecordSet>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, name: impl Into<String>, records: RecordSet) -> Self {
        self.sheets.insert(name.into(), records);
        self
    }
}

impl SourceReader for StaticSource {
    fn read(&self, _location: &Path, subset: &str) -> Result<RecordSet, SourceReadError> {
        self.sheets
            .get(subset)
            .cloned()
            .ok_or_else(|| {
                let mut available: Vec<String> = self.sheets.keys().cloned().collect();
                available.sort();
                SourceReadError::SubsetNotFound {
                    subset: subset.to_string(),
                    available,
                }
            })
    }
}

/// Types a raw text cell: blank is missing, finite numbers are numbers,
/// `YYYY-MM-DD` is a date, anything else is text.
pub(crate) fn coerce_text_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Missing;
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        if n.is_finite() {
            return Value::Number(n);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Value::Date(d);
    }
    Value::Text(raw.to_string())
}

/// Drops rows where every cell is missing.
pub(crate) fn drop_blank_rows(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.into_iter()
        .filter(|r| r.iter().any(|v| !v.is_missing()))
        .collect()
}
