use serde::Serialize;
use tracing::debug;

use crate::error::{IngestError, SchemaError, StoreError};
use crate::store::{Store, StoreTransaction, TableSchema};
use crate::types::{Key, Row};

/// Why a row was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A record with the same key was already stored.
    ExistingKey,
    /// The store's uniqueness constraint rejected the write because another
    /// writer stored the key first.
    ConcurrentInsert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted,
    Skipped(SkipReason),
}

/// Writes `row` unless a record with the same key already exists.
///
/// The existence check and the insert run inside one store transaction, which
/// the store makes exclusive against other writers. A row with an equal key
/// but different non-key values is skipped, never used to update the stored
/// record.
pub fn insert_if_new<S: Store>(
    store: &mut S,
    schema: &TableSchema,
    row: &Row,
) -> Result<InsertOutcome, IngestError> {
    let key = Key::from_row(row, &schema.key_columns).map_err(SchemaError::MissingKeyColumn)?;
    Ok(insert_keyed(store, schema, row, &key)?)
}

pub(crate) fn insert_keyed<S: Store>(
    store: &mut S,
    schema: &TableSchema,
    row: &Row,
    key: &Key,
) -> Result<InsertOutcome, StoreError> {
    let mut tx = store.begin_transaction()?;

    if tx.find_by_key(schema, key)?.is_some() {
        tx.rollback()?;
        debug!(key = %key, "Key already stored, skipping row");
        return Ok(InsertOutcome::Skipped(SkipReason::ExistingKey));
    }

    match tx.insert(schema, row) {
        Ok(()) => {
            tx.commit()?;
            Ok(InsertOutcome::Inserted)
        }
        Err(StoreError::DuplicateKeyRace { table }) => {
            tx.rollback()?;
            debug!(key = %key, table = %table, "Constraint rejected concurrent duplicate");
            Ok(InsertOutcome::Skipped(SkipReason::ConcurrentInsert))
        }
        // dropping the transaction rolls it back
        Err(e) => Err(e),
    }
}
