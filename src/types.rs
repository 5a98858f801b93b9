use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A single typed cell value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Missing,
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Missing => f.write_str("<missing>"),
        }
    }
}

/// Inferred type of a column, used to pick a fill value and a storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Text,
    Date,
}

/// An ordered mapping from column name to value.
///
/// Rows are never mutated by the pipeline stages; every stage builds a new row.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, v)| (name.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns a copy of this row with `column` appended.
    pub fn with(&self, column: impl Into<String>, value: Value) -> Row {
        let mut fields = self.fields.clone();
        fields.push((column.into(), value));
        Row { fields }
    }
}

/// Rows sharing one header. Every row is built from the header, so all rows
/// carry the same column set in the same order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl RecordSet {
    /// Builds a record set from a header and positional cell values. Short
    /// rows are padded with `Missing`, extra trailing cells are dropped.
    pub fn from_cells(columns: Vec<String>, cells: Vec<Vec<Value>>) -> Self {
        let rows = cells
            .into_iter()
            .map(|mut values| {
                values.resize(columns.len(), Value::Missing);
                Row::new(columns.iter().cloned().zip(values).collect())
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Applies `f` to every row, producing a new record set with `columns`
    /// as its header. `f` must yield rows carrying exactly those columns.
    pub(crate) fn map_rows<F>(&self, columns: Vec<String>, f: F) -> RecordSet
    where
        F: FnMut(&Row) -> Row,
    {
        let rows: Vec<Row> = self.rows.iter().map(f).collect();
        debug_assert!(rows
            .iter()
            .all(|r| r.columns().eq(columns.iter().map(String::as_str))));
        RecordSet { columns, rows }
    }

    /// Values of one column, in row order.
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows.iter().filter_map(move |r| r.get(column))
    }
}

/// The composite identity of a row: its values for the configured key columns,
/// in configuration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Key {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Key {
    /// Extracts the key from a row. Returns the first key column the row lacks
    /// as the error.
    pub fn from_row(row: &Row, key_columns: &[String]) -> std::result::Result<Key, String> {
        let values = key_columns
            .iter()
            .map(|c| row.get(c).cloned().ok_or_else(|| c.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Key {
            columns: key_columns.to_vec(),
            values,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Stable SHA-256 fingerprint of the key tuple. Two `Missing` values in the
    /// same position produce the same fingerprint; `0.0` and `-0.0` too.
    pub fn fingerprint(&self) -> String {
        let mut s = String::new();
        for (column, value) in self.columns.iter().zip(&self.values) {
            s.push_str(column);
            s.push('=');
            match value {
                Value::Number(n) => {
                    let n = if *n == 0.0 { 0.0f64 } else { *n };
                    s.push_str(&format!("n:{:016x}", n.to_bits()));
                }
                Value::Text(t) => s.push_str(&format!("t:{}:{}", t.len(), t)),
                Value::Date(d) => s.push_str(&format!("d:{}", d.format("%Y-%m-%d"))),
                Value::Missing => s.push('m'),
            }
            s.push('|');
        }

        let mut hasher = Sha256::new();
        hasher.update(s.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", v)?;
        }
        f.write_str(")")
    }
}
