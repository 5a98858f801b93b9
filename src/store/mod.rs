// Persistent tables keyed by a composite business key

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

use serde::Serialize;
use std::collections::HashMap;

use crate::error::StoreError;
use crate::types::{ColumnType, Key, Row};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

/// Layout of an ingestion table: all columns in order plus the subset that
/// forms the unique key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub key_columns: Vec<String>,
}

impl TableSchema {
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.ty)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// A durable table store. All writes go through a transaction obtained from
/// `begin_transaction`.
///
/// Implementations must make a transaction exclusive with respect to other
/// writers from the moment it begins, and must reject a second row with an
/// equal key in the same table with `StoreError::DuplicateKeyRace`.
pub trait Store {
    type Tx<'a>: StoreTransaction
    where
        Self: 'a;

    /// Creates the table and its key index if absent. An existing table must
    /// already carry every column of `schema`.
    fn ensure_table(&mut self, schema: &TableSchema) -> Result<(), StoreError>;

    fn begin_transaction(&mut self) -> Result<Self::Tx<'_>, StoreError>;

    /// Column types recorded for an existing table, or `None` if the table
    /// has not been created yet.
    fn column_types(&mut self, table: &str) -> Result<Option<HashMap<String, ColumnType>>, StoreError>;

    fn count(&mut self, table: &str) -> Result<u64, StoreError>;

    /// Every row of a table, in insertion order.
    fn fetch_all(&mut self, schema: &TableSchema) -> Result<Vec<Row>, StoreError>;
}

pub trait StoreTransaction {
    /// Looks up a record whose key columns equal `key`, treating two missing
    /// values as equal.
    fn find_by_key(&mut self, schema: &TableSchema, key: &Key) -> Result<Option<Row>, StoreError>;

    fn insert(&mut self, schema: &TableSchema, row: &Row) -> Result<(), StoreError>;

    fn commit(self) -> Result<(), StoreError>;

    fn rollback(self) -> Result<(), StoreError>;
}
