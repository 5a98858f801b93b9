use chrono::NaiveDate;
use serde::Serialize;

use crate::error::SchemaError;
use crate::types::{ColumnType, RecordSet, Row, Value};

/// Where and when a batch of rows was ingested, and the columns that record it.
///
/// The ingestion date is a calendar date rather than a timestamp so that two
/// runs on the same day against the same source produce equal keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub source_id: String,
    pub ingestion_date: NaiveDate,
    pub source_column: String,
    pub date_column: String,
}

impl Provenance {
    pub fn new(
        source_id: impl Into<String>,
        ingestion_date: NaiveDate,
        source_column: impl Into<String>,
        date_column: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            ingestion_date,
            source_column: source_column.into(),
            date_column: date_column.into(),
        }
    }

    /// The provenance columns and their storage types, in the order they are
    /// appended to rows.
    pub fn columns(&self) -> [(String, ColumnType); 2] {
        [
            (self.source_column.clone(), ColumnType::Text),
            (self.date_column.clone(), ColumnType::Date),
        ]
    }

    /// Stamps one row with the source identifier and ingestion date.
    pub fn enrich(&self, row: &Row) -> Row {
        row.with(self.source_column.clone(), Value::Text(self.source_id.clone()))
            .with(self.date_column.clone(), Value::Date(self.ingestion_date))
    }

    /// Stamps every row. Fails if a source column already uses one of the
    /// provenance column names.
    pub fn enrich_record_set(&self, records: &RecordSet) -> Result<RecordSet, SchemaError> {
        for name in [&self.source_column, &self.date_column] {
            if records.columns().iter().any(|c| c == name) {
                return Err(SchemaError::ProvenanceCollision(name.clone()));
            }
        }

        let mut columns = records.columns().to_vec();
        columns.push(self.source_column.clone());
        columns.push(self.date_column.clone());
        Ok(records.map_rows(columns, |row| self.enrich(row)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance() -> Provenance {
        Provenance::new(
            "data.xlsx",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "source_file",
            "import_date",
        )
    }

    #[test]
    fn test_enrich_appends_provenance() {
        let row = Row::new(vec![("a".into(), Value::Number(1.0))]);
        let out = provenance().enrich(&row);
        assert_eq!(
            out.columns().collect::<Vec<_>>(),
            vec!["a", "source_file", "import_date"]
        );
        assert_eq!(out.get("source_file"), Some(&Value::text("data.xlsx")));
        assert_eq!(
            out.get("import_date"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()))
        );
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_enrich_is_deterministic() {
        let row = Row::new(vec![("a".into(), Value::text("x"))]);
        assert_eq!(provenance().enrich(&row), provenance().enrich(&row));
    }

    #[test]
    fn test_provenance_collision() {
        let rs = RecordSet::from_cells(vec!["source_file".into()], vec![vec![Value::text("x")]]);
        assert_eq!(
            provenance().enrich_record_set(&rs).unwrap_err(),
            SchemaError::ProvenanceCollision("source_file".into())
        );
    }
}
