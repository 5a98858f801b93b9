use chrono::NaiveDate;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::os::raw::c_int;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{Store, StoreTransaction, TableSchema};
use crate::error::StoreError;
use crate::types::{ColumnType, Key, Row, Value};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

// Extended result codes for uniqueness failures
const SQLITE_CONSTRAINT_PRIMARYKEY: c_int = 1555;
const SQLITE_CONSTRAINT_UNIQUE: c_int = 2067;

/// SQLite-backed store.
///
/// Two mechanisms keep keys unique across concurrent writers: every table gets
/// a unique index over its key columns, and every transaction starts with
/// `BEGIN IMMEDIATE`, which takes the database write lock before the existence
/// check runs. The index also covers writers that bypass this crate; the
/// immediate transaction also covers keys containing NULLs, which a SQLite
/// unique index treats as distinct.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let store = Self::from_connection(Connection::open(path)?)?;
        store.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// (name, declared type) for every column of `table`, in table order.
    fn table_columns(conn: &Connection, table: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Number => "REAL",
        ColumnType::Text => "TEXT",
        ColumnType::Date => "DATE",
    }
}

/// Maps a declared column type back to a `ColumnType`, using SQLite's own
/// affinity rules for tables this crate did not create.
fn column_type_from_decl(decl: &str) -> ColumnType {
    let decl = decl.to_ascii_uppercase();
    if decl.contains("DATE") {
        ColumnType::Date
    } else if decl.contains("CHAR") || decl.contains("CLOB") || decl.contains("TEXT") || decl.is_empty() {
        ColumnType::Text
    } else if ["INT", "REAL", "FLOA", "DOUB", "NUM", "DEC"].iter().any(|t| decl.contains(t)) {
        ColumnType::Number
    } else {
        ColumnType::Text
    }
}

/// Whether a failed write was rejected by the uniqueness of the key columns,
/// as opposed to a CHECK, NOT NULL, foreign key or some other unique index.
fn is_key_conflict(extended_code: c_int, message: Option<&str>, schema: &TableSchema) -> bool {
    if extended_code != SQLITE_CONSTRAINT_UNIQUE && extended_code != SQLITE_CONSTRAINT_PRIMARYKEY {
        return false;
    }
    // "UNIQUE constraint failed: people.name, people.seen"
    let Some((_, listed)) = message.and_then(|m| m.split_once(": ")) else {
        return true;
    };
    let mut failed: Vec<&str> = listed
        .split(", ")
        .map(|c| c.rsplit_once('.').map_or(c, |(_, column)| column))
        .collect();
    let mut keys: Vec<&str> = schema.key_columns.iter().map(String::as_str).collect();
    failed.sort_unstable();
    keys.sort_unstable();
    failed == keys
}

fn select_columns(schema: &TableSchema) -> String {
    schema
        .column_names()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_row(schema: &TableSchema, row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut fields = Vec::with_capacity(schema.columns.len());
    for (i, column) in schema.columns.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Missing,
            ValueRef::Integer(n) => Value::Number(n as f64),
            ValueRef::Real(f) => Value::Number(f),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                let s = String::from_utf8_lossy(bytes).into_owned();
                match column.ty {
                    ColumnType::Date => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                        .map(Value::Date)
                        .unwrap_or(Value::Text(s)),
                    _ => Value::Text(s),
                }
            }
        };
        fields.push((column.name.clone(), value));
    }
    Ok(Row::new(fields))
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Number(n) => ToSqlOutput::Owned(SqlValue::Real(*n)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Date(d) => ToSqlOutput::Owned(SqlValue::Text(d.format("%Y-%m-%d").to_string())),
            Value::Missing => ToSqlOutput::Owned(SqlValue::Null),
        })
    }
}

impl Store for SqliteStore {
    type Tx<'a> = SqliteTransaction<'a>;

    fn ensure_table(&mut self, schema: &TableSchema) -> Result<(), StoreError> {
        let table = quote_ident(&schema.name);
        let column_defs = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(c.ty)))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn
            .execute(&format!("CREATE TABLE IF NOT EXISTS {} ({})", table, column_defs), [])?;

        let existing = Self::table_columns(&self.conn, &schema.name)?;
        let missing: Vec<String> = schema
            .column_names()
            .filter(|c| !existing.iter().any(|(e, _)| e == c))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::TableMismatch {
                table: schema.name.clone(),
                missing,
            });
        }

        let index = quote_ident(&format!("ux_{}__{}", schema.name, schema.key_columns.join("__")));
        let key_list = schema
            .key_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute(
            &format!("CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})", index, table, key_list),
            [],
        )?;

        debug!(table = %schema.name, columns = schema.columns.len(), "Ensured table");
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<SqliteTransaction<'_>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteTransaction { tx })
    }

    fn column_types(&mut self, table: &str) -> Result<Option<HashMap<String, ColumnType>>, StoreError> {
        if !Self::table_exists(&self.conn, table)? {
            return Ok(None);
        }
        let types = Self::table_columns(&self.conn, table)?
            .into_iter()
            .map(|(name, decl)| (name, column_type_from_decl(&decl)))
            .collect();
        Ok(Some(types))
    }

    fn count(&mut self, table: &str) -> Result<u64, StoreError> {
        if !Self::table_exists(&self.conn, table)? {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn fetch_all(&mut self, schema: &TableSchema) -> Result<Vec<Row>, StoreError> {
        if !Self::table_exists(&self.conn, &schema.name)? {
            return Err(StoreError::UnknownTable(schema.name.clone()));
        }
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            select_columns(schema),
            quote_ident(&schema.name)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| read_row(schema, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

pub struct SqliteTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn find_by_key(&mut self, schema: &TableSchema, key: &Key) -> Result<Option<Row>, StoreError> {
        // IS rather than = so that NULL matches NULL
        let condition = key
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} IS ?{}", quote_ident(c), i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            select_columns(schema),
            quote_ident(&schema.name),
            condition
        );
        let found = self
            .tx
            .query_row(&sql, params_from_iter(key.values()), |row| read_row(schema, row))
            .optional()?;
        Ok(found)
    }

    fn insert(&mut self, schema: &TableSchema, row: &Row) -> Result<(), StoreError> {
        let columns = row.columns().map(quote_ident).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=row.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&schema.name),
            columns,
            placeholders
        );
        match self.tx.execute(&sql, params_from_iter(row.values())) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, message))
                if is_key_conflict(e.extended_code, message.as_deref(), schema) =>
            {
                Err(StoreError::DuplicateKeyRace {
                    table: schema.name.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn commit(self) -> Result<(), StoreError> {
        Ok(self.tx.commit()?)
    }

    fn rollback(self) -> Result<(), StoreError> {
        Ok(self.tx.rollback()?)
    }
}
