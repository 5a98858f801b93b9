use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{ColumnType, RecordSet, Row, Value};

/// A fill value as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Number(f64),
    Text(String),
}

impl From<&FillValue> for Value {
    fn from(v: &FillValue) -> Self {
        match v {
            FillValue::Number(n) => Value::Number(*n),
            FillValue::Text(s) => Value::Text(s.clone()),
        }
    }
}

/// The policy table mapping each column type to the value that replaces a
/// missing cell. There is one entry per `ColumnType`, so every missing cell
/// has a replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillPolicy {
    pub number: FillValue,
    pub text: FillValue,
    pub date: FillValue,
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self {
            number: FillValue::Number(0.0),
            text: FillValue::Text(String::new()),
            date: FillValue::Text(String::new()),
        }
    }
}

impl FillPolicy {
    pub fn fill_for(&self, ty: ColumnType) -> Value {
        match ty {
            ColumnType::Number => (&self.number).into(),
            ColumnType::Text => (&self.text).into(),
            ColumnType::Date => (&self.date).into(),
        }
    }
}

pub type ColumnTypes = HashMap<String, ColumnType>;

/// Infers one type per column from the whole record set: a column is numeric
/// when every present value is a number (an all-missing column counts as
/// numeric), a date column when every present value is a date, text otherwise.
pub fn infer_column_types(records: &RecordSet) -> ColumnTypes {
    records
        .columns()
        .iter()
        .map(|column| {
            let present: Vec<&Value> = records
                .column_values(column)
                .filter(|v| !v.is_missing())
                .collect();
            let ty = if present.iter().all(|v| matches!(v, Value::Number(_))) {
                ColumnType::Number
            } else if present.iter().all(|v| matches!(v, Value::Date(_))) {
                ColumnType::Date
            } else {
                ColumnType::Text
            };
            (column.clone(), ty)
        })
        .collect()
}

/// Replaces every missing value in `row` using the column's type and the
/// policy. Columns absent from `column_types` are treated as text.
pub fn impute(row: &Row, column_types: &ColumnTypes, policy: &FillPolicy) -> Row {
    Row::new(
        row.iter()
            .map(|(column, value)| {
                let value = if value.is_missing() {
                    let ty = column_types.get(column).copied().unwrap_or(ColumnType::Text);
                    policy.fill_for(ty)
                } else {
                    value.clone()
                };
                (column.to_string(), value)
            })
            .collect(),
    )
}

pub fn impute_record_set(
    records: &RecordSet,
    column_types: &ColumnTypes,
    policy: &FillPolicy,
) -> RecordSet {
    records.map_rows(records.columns().to_vec(), |row| impute(row, column_types, policy))
}
