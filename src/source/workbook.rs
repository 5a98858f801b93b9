use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;
use tracing::debug;

use super::{drop_blank_rows, SourceReader};
use crate::error::SourceReadError;
use crate::types::{RecordSet, Value};

/// Reads one sheet of a spreadsheet (xlsx, xlsm, xlsb, xls, ods).
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkbookReader;

fn header_name(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        other => format!("{}", other),
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Int(n) => Value::Number(*n as f64),
        Data::Float(f) if f.is_finite() => Value::Number(*f),
        Data::Float(_) => Value::Missing,
        Data::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
        Data::String(s) if s.trim().is_empty() => Value::Missing,
        Data::String(s) => Value::Text(s.clone()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| Value::Date(d.date()))
            .unwrap_or(Value::Missing),
        Data::DateTimeIso(s) => chrono::NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d")
            .map(Value::Date)
            .unwrap_or_else(|_| Value::Text(s.clone())),
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) | Data::Empty => Value::Missing,
    }
}

impl SourceReader for WorkbookReader {
    fn read(&self, location: &Path, subset: &str) -> Result<RecordSet, SourceReadError> {
        if !location.exists() {
            return Err(SourceReadError::NotFound(location.to_path_buf()));
        }

        let mut workbook = open_workbook_auto(location)?;
        let available = workbook.sheet_names().to_vec();
        if !available.iter().any(|s| s == subset) {
            return Err(SourceReadError::SubsetNotFound {
                subset: subset.to_string(),
                available,
            });
        }

        let range = workbook.worksheet_range(subset)?;
        let (row_count, col_count) = range.get_size();
        debug!(sheet = subset, rows = row_count, cols = col_count, "Read worksheet range");

        let mut rows = range.rows();
        let header: Vec<String> = rows
            .next()
            .ok_or(SourceReadError::NoHeader)?
            .iter()
            .map(header_name)
            .collect();

        let cells: Vec<Vec<Value>> = rows.map(|r| r.iter().map(cell_value).collect()).collect();
        Ok(RecordSet::from_cells(header, drop_blank_rows(cells)))
    }
}
