use csv::ReaderBuilder;
use std::path::Path;
use tracing::debug;

use super::{coerce_text_cell, drop_blank_rows, SourceReader};
use crate::error::SourceReadError;
use crate::types::{RecordSet, Value};

/// Reads a delimited text file. A CSV holds a single table, so the subset
/// name is ignored.
#[derive(Debug, Clone, Copy)]
pub struct CsvReader {
    delimiter: u8,
}

impl Default for CsvReader {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvReader {
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl SourceReader for CsvReader {
    fn read(&self, location: &Path, subset: &str) -> Result<RecordSet, SourceReadError> {
        if !location.exists() {
            return Err(SourceReadError::NotFound(location.to_path_buf()));
        }
        if !subset.is_empty() {
            debug!(subset, "Ignoring subset for delimited source");
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_path(location)?;

        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if header.is_empty() {
            return Err(SourceReadError::NoHeader);
        }

        let mut cells: Vec<Vec<Value>> = Vec::new();
        for record in reader.records() {
            let record = record?;
            cells.push(record.iter().map(coerce_text_cell).collect());
        }

        Ok(RecordSet::from_cells(header, drop_blank_rows(cells)))
    }
}
