use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{Store, StoreTransaction, TableSchema};
use crate::error::StoreError;
use crate::types::{ColumnType, Key, Row};

struct MemTable {
    schema: TableSchema,
    rows: Vec<Row>,
    keys: HashSet<String>,
}

type Tables = HashMap<String, MemTable>;

/// In-memory store for development/testing.
///
/// Clones share the same tables, so several pipeline runs can target one
/// store from different threads. A transaction holds the table lock from
/// `begin_transaction` until commit or rollback, which serializes writers.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

impl Store for InMemoryStore {
    type Tx<'a> = InMemoryTransaction<'a>;

    fn ensure_table(&mut self, schema: &TableSchema) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        match tables.get(&schema.name) {
            Some(existing) => {
                let missing: Vec<String> = schema
                    .column_names()
                    .filter(|c| existing.schema.column_type(c).is_none())
                    .map(str::to_string)
                    .collect();
                if !missing.is_empty() {
                    return Err(StoreError::TableMismatch {
                        table: schema.name.clone(),
                        missing,
                    });
                }
            }
            None => {
                tables.insert(
                    schema.name.clone(),
                    MemTable {
                        schema: schema.clone(),
                        rows: Vec::new(),
                        keys: HashSet::new(),
                    },
                );
                debug!(table = %schema.name, "Created in-memory table");
            }
        }
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<InMemoryTransaction<'_>, StoreError> {
        Ok(InMemoryTransaction {
            tables: self.lock()?,
            pending: Vec::new(),
        })
    }

    fn column_types(&mut self, table: &str) -> Result<Option<HashMap<String, ColumnType>>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.get(table).map(|t| {
            t.schema
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.ty))
                .collect()
        }))
    }

    fn count(&mut self, table: &str) -> Result<u64, StoreError> {
        let tables = self.lock()?;
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(t.rows.len() as u64)
    }

    fn fetch_all(&mut self, schema: &TableSchema) -> Result<Vec<Row>, StoreError> {
        let tables = self.lock()?;
        let t = tables
            .get(&schema.name)
            .ok_or_else(|| StoreError::UnknownTable(schema.name.clone()))?;
        Ok(t.rows.clone())
    }
}

pub struct InMemoryTransaction<'a> {
    tables: MutexGuard<'a, Tables>,
    pending: Vec<(String, String, Row)>,
}

impl InMemoryTransaction<'_> {
    fn table(&self, name: &str) -> Result<&MemTable, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn is_taken(&self, table: &MemTable, fingerprint: &str) -> bool {
        table.keys.contains(fingerprint)
            || self
                .pending
                .iter()
                .any(|(t, fp, _)| *t == table.schema.name && fp == fingerprint)
    }
}

impl StoreTransaction for InMemoryTransaction<'_> {
    fn find_by_key(&mut self, schema: &TableSchema, key: &Key) -> Result<Option<Row>, StoreError> {
        let table = self.table(&schema.name)?;
        let fingerprint = key.fingerprint();
        if !self.is_taken(table, &fingerprint) {
            return Ok(None);
        }
        let matches = |row: &&Row| {
            Key::from_row(row, key.columns())
                .map(|k| k.fingerprint() == fingerprint)
                .unwrap_or(false)
        };
        let found = table
            .rows
            .iter()
            .chain(self.pending.iter().map(|(_, _, r)| r))
            .find(matches)
            .cloned();
        Ok(found)
    }

    fn insert(&mut self, schema: &TableSchema, row: &Row) -> Result<(), StoreError> {
        let table = self.table(&schema.name)?;
        let key = Key::from_row(row, &table.schema.key_columns).map_err(|column| {
            StoreError::Unavailable(format!("row lacks key column '{}'", column))
        })?;
        let fingerprint = key.fingerprint();
        if self.is_taken(table, &fingerprint) {
            return Err(StoreError::DuplicateKeyRace {
                table: schema.name.clone(),
            });
        }
        self.pending.push((schema.name.clone(), fingerprint, row.clone()));
        Ok(())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        for (name, fingerprint, row) in self.pending.drain(..) {
            let table = self
                .tables
                .get_mut(&name)
                .ok_or_else(|| StoreError::UnknownTable(name.clone()))?;
            table.keys.insert(fingerprint);
            table.rows.push(row);
        }
        Ok(())
    }

    fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
