use anyhow::Result;
use chrono::NaiveDate;
use sheet_ingest::error::{IngestError, SchemaError, SourceReadError, StoreError};
use sheet_ingest::pipeline::enrich::Provenance;
use sheet_ingest::source::{reader_for, StaticSource};
use sheet_ingest::store::{InMemoryStore, SqliteStore, Store, StoreTransaction, TableSchema};
use sheet_ingest::types::{ColumnType, Key, RecordSet, Row, Value};
use sheet_ingest::{IngestConfig, IngestReport, IngestRequest, OnStoreError, Pipeline, RunStatus};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::thread;
use tempfile::tempdir;

const SHEET: &str = "Sheet1";

fn text(s: &str) -> Value {
    Value::text(s)
}

/// Five rows; row 4 repeats row 1's key columns with a different `A`.
fn scenario_rows() -> RecordSet {
    RecordSet::from_cells(
        vec!["A".into(), "B".into(), "Smith A".into(), "Smith B".into(), "Smith C".into()],
        vec![
            vec![Value::Number(1.0), Value::Number(10.5), text("John"), text("Doe"), text("X")],
            vec![Value::Missing, Value::Number(20.5), text("Jane"), Value::Missing, text("Y")],
            vec![Value::Number(3.0), Value::Missing, Value::Missing, text("Smith"), text("Z")],
            vec![Value::Number(4.0), Value::Number(40.5), text("John"), text("Doe"), text("X")],
            vec![Value::Number(5.0), Value::Number(50.5), text("Jane"), text("Doe"), Value::Missing],
        ],
    )
}

fn config() -> IngestConfig {
    IngestConfig {
        key_columns: ["source_file", "import_date", "Smith A", "Smith B", "Smith C"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        table_name: "tgmmh".into(),
        ..IngestConfig::default()
    }
    .validated()
    .expect("valid config")
}

fn source() -> StaticSource {
    StaticSource::new().with_sheet(SHEET, scenario_rows())
}

fn stored_schema(config: &IngestConfig, report: &IngestReport) -> TableSchema {
    let provenance = Provenance::new(
        report.source_id.clone(),
        report.ingestion_date,
        &config.source_identifier_column,
        &config.ingestion_date_column,
    );
    Pipeline::new(config)
        .prepare(&scenario_rows(), &provenance)
        .expect("scenario rows prepare")
        .schema
}

fn request() -> IngestRequest {
    IngestRequest::new("exploration/My Exploration Data.xlsx", SHEET)
        .with_ingestion_date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
}

/// Fails the transactions whose 1-based sequence number falls in `failing`,
/// as if the database went away mid-run.
struct FlakyStore<S> {
    inner: S,
    calls: usize,
    failing: RangeInclusive<usize>,
}

impl<S> FlakyStore<S> {
    fn failing_from(inner: S, call: usize) -> Self {
        Self { inner, calls: 0, failing: call..=usize::MAX }
    }

    fn failing_once(inner: S, call: usize) -> Self {
        Self { inner, calls: 0, failing: call..=call }
    }
}

impl<S: Store> Store for FlakyStore<S> {
    type Tx<'a> = S::Tx<'a> where Self: 'a;

    fn ensure_table(&mut self, schema: &TableSchema) -> Result<(), StoreError> {
        self.inner.ensure_table(schema)
    }

    fn begin_transaction(&mut self) -> Result<Self::Tx<'_>, StoreError> {
        self.calls += 1;
        if self.failing.contains(&self.calls) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.begin_transaction()
    }

    fn column_types(&mut self, table: &str) -> Result<Option<HashMap<String, ColumnType>>, StoreError> {
        self.inner.column_types(table)
    }

    fn count(&mut self, table: &str) -> Result<u64, StoreError> {
        self.inner.count(table)
    }

    fn fetch_all(&mut self, schema: &TableSchema) -> Result<Vec<Row>, StoreError> {
        self.inner.fetch_all(schema)
    }
}

/// A store whose existence check never finds anything, which opens the same
/// window two concurrent writers would see. Only the store's uniqueness
/// constraint stands between the pipeline and a duplicate.
struct BlindStore<S>(S);

struct BlindTx<T>(T);

impl<T: StoreTransaction> StoreTransaction for BlindTx<T> {
    fn find_by_key(&mut self, _schema: &TableSchema, _key: &Key) -> Result<Option<Row>, StoreError> {
        Ok(None)
    }

    fn insert(&mut self, schema: &TableSchema, row: &Row) -> Result<(), StoreError> {
        self.0.insert(schema, row)
    }

    fn commit(self) -> Result<(), StoreError> {
        self.0.commit()
    }

    fn rollback(self) -> Result<(), StoreError> {
        self.0.rollback()
    }
}

impl<S: Store> Store for BlindStore<S> {
    type Tx<'a> = BlindTx<S::Tx<'a>> where Self: 'a;

    fn ensure_table(&mut self, schema: &TableSchema) -> Result<(), StoreError> {
        self.0.ensure_table(schema)
    }

    fn begin_transaction(&mut self) -> Result<Self::Tx<'_>, StoreError> {
        Ok(BlindTx(self.0.begin_transaction()?))
    }

    fn column_types(&mut self, table: &str) -> Result<Option<HashMap<String, ColumnType>>, StoreError> {
        self.0.column_types(table)
    }

    fn count(&mut self, table: &str) -> Result<u64, StoreError> {
        self.0.count(table)
    }

    fn fetch_all(&mut self, schema: &TableSchema) -> Result<Vec<Row>, StoreError> {
        self.0.fetch_all(schema)
    }
}

#[test]
fn test_scenario_a_same_run_duplicate_skipped() -> Result<()> {
    let config = config();
    let mut store = SqliteStore::open_in_memory()?;

    let report = Pipeline::new(&config).run(&source(), &request(), &mut store)?;

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.total_rows, 5);
    assert_eq!(report.inserted, 4);
    assert_eq!(report.skipped_rows, vec![4]);
    assert_eq!(report.source_id, "My Exploration Data.xlsx");
    assert_eq!(store.count("tgmmh")?, 4);
    Ok(())
}

#[test]
fn test_scenario_b_second_run_inserts_nothing() -> Result<()> {
    let config = config();
    let dir = tempdir()?;
    let db = dir.path().join("ingest.db");

    let first = {
        let mut store = SqliteStore::open(&db)?;
        Pipeline::new(&config).run(&source(), &request(), &mut store)?
    };
    let mut store = SqliteStore::open(&db)?;
    let second = Pipeline::new(&config).run(&source(), &request(), &mut store)?;

    assert_eq!(first.inserted, 4);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 5);
    assert_eq!(store.count("tgmmh")?, 4);
    Ok(())
}

#[test]
fn test_idempotent_store_contents() -> Result<()> {
    let config = config();
    let mut once = SqliteStore::open_in_memory()?;
    let mut twice = SqliteStore::open_in_memory()?;

    let pipeline = Pipeline::new(&config);
    let report = pipeline.run(&source(), &request(), &mut once)?;
    pipeline.run(&source(), &request(), &mut twice)?;
    pipeline.run(&source(), &request(), &mut twice)?;

    let schema = stored_schema(&config, &report);
    assert_eq!(once.fetch_all(&schema)?, twice.fetch_all(&schema)?);
    Ok(())
}

#[test]
fn test_stored_rows_are_imputed_and_stamped() -> Result<()> {
    let config = config();
    let mut store = InMemoryStore::new();
    let report = Pipeline::new(&config).run(&source(), &request(), &mut store)?;

    let rows = store.fetch_all(&stored_schema(&config, &report))?;
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.values().all(|v| !v.is_missing())));
    // row 2: numeric A filled with 0, text Smith B filled with ""
    assert_eq!(rows[1].get("a"), Some(&Value::Number(0.0)));
    assert_eq!(rows[1].get("smith_b"), Some(&text("")));
    assert_eq!(rows[0].get("source_file"), Some(&text("My Exploration Data.xlsx")));
    // first occurrence wins; row 4's A = 4 was never written
    assert_eq!(rows[0].get("a"), Some(&Value::Number(1.0)));
    Ok(())
}

#[test]
fn test_scenario_c_store_failure_aborts_batch() -> Result<()> {
    let config = config();
    let dir = tempdir()?;
    let db = dir.path().join("ingest.db");

    let mut store = FlakyStore::failing_from(SqliteStore::open(&db)?, 3);
    let report = Pipeline::new(&config).run(&source(), &request(), &mut store)?;

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].row, 3);
    assert!(report.failed[0].key.contains("Smith"));
    assert!(report.failed[0].error.contains("connection refused"));
    assert_eq!(report.not_attempted, 2);

    // rows 1 and 2 are durable
    let mut reopened = SqliteStore::open(&db)?;
    assert_eq!(reopened.count("tgmmh")?, 2);
    Ok(())
}

#[test]
fn test_continue_policy_attempts_remaining_rows() -> Result<()> {
    let mut config = config();
    config.on_store_error = OnStoreError::Continue;
    let mut store = FlakyStore::failing_once(InMemoryStore::new(), 3);

    let report = Pipeline::new(&config).run(&source(), &request(), &mut store)?;
    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].row, 3);
    assert_eq!(report.not_attempted, 0);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.skipped_rows, vec![4]);
    Ok(())
}

#[test]
fn test_rerun_after_partial_run_fills_the_gap() -> Result<()> {
    let config = config();
    let dir = tempdir()?;
    let db = dir.path().join("ingest.db");

    let mut flaky = FlakyStore::failing_from(SqliteStore::open(&db)?, 3);
    Pipeline::new(&config).run(&source(), &request(), &mut flaky)?;

    let mut store = SqliteStore::open(&db)?;
    let report = Pipeline::new(&config).run(&source(), &request(), &mut store)?;
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.skipped_rows, vec![1, 2, 4]);
    assert_eq!(store.count("tgmmh")?, 4);
    Ok(())
}

fn partial_rerun(mut store: impl Store) -> Result<()> {
    let mut config = config();
    config.key_columns = vec!["source_file".into(), "import_date".into(), "id".into(), "c".into()];
    let config = config.validated()?;

    let full = RecordSet::from_cells(
        vec!["id".into(), "c".into()],
        vec![vec![text("a"), text("X")], vec![text("b"), Value::Missing]],
    );
    let tail = RecordSet::from_cells(vec!["id".into(), "c".into()], vec![vec![text("b"), Value::Missing]]);

    let first = Pipeline::new(&config).run(&StaticSource::new().with_sheet(SHEET, full), &request(), &mut store)?;
    assert_eq!(first.inserted, 2);

    // "c" is all missing on its own, but the table already stores it as text
    let second = Pipeline::new(&config).run(&StaticSource::new().with_sheet(SHEET, tail), &request(), &mut store)?;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped_rows, vec![1]);
    assert_eq!(store.count("tgmmh")?, 2);
    Ok(())
}

#[test]
fn test_partial_rerun_reuses_stored_types_sqlite() -> Result<()> {
    let dir = tempdir()?;
    partial_rerun(SqliteStore::open(dir.path().join("ingest.db"))?)
}

#[test]
fn test_partial_rerun_reuses_stored_types_in_memory() -> Result<()> {
    partial_rerun(InMemoryStore::new())
}

#[test]
fn test_check_constraint_failure_is_reported_not_skipped() -> Result<()> {
    let mut config = config();
    config.key_columns = vec!["source_file".into(), "import_date".into(), "id".into()];
    config.table_name = "t".into();
    let config = config.validated()?;
    let dir = tempdir()?;
    let db = dir.path().join("ingest.db");
    rusqlite::Connection::open(&db)?.execute_batch(
        "CREATE TABLE t (id TEXT, amount REAL CHECK (amount >= 0), source_file TEXT, import_date TEXT);",
    )?;

    let rows = RecordSet::from_cells(
        vec!["id".into(), "amount".into()],
        vec![vec![text("a"), Value::Number(-5.0)], vec![text("b"), Value::Number(1.0)]],
    );
    let source = StaticSource::new().with_sheet(SHEET, rows);
    let mut store = SqliteStore::open(&db)?;
    let report = Pipeline::new(&config).run(&source, &request(), &mut store)?;

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.inserted, 0);
    assert!(report.skipped_rows.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].row, 1);
    assert!(report.failed[0].error.contains("CHECK"), "{}", report.failed[0].error);
    assert_eq!(report.not_attempted, 1);
    assert_eq!(store.count("t")?, 0);
    Ok(())
}

#[test]
fn test_constraint_catches_duplicates_the_check_missed() -> Result<()> {
    let config = config();
    let mut store = BlindStore(SqliteStore::open_in_memory()?);

    let first = Pipeline::new(&config).run(&source(), &request(), &mut store)?;
    assert_eq!(first.inserted, 4);
    assert_eq!(first.skipped_rows, vec![4]);

    let second = Pipeline::new(&config).run(&source(), &request(), &mut store)?;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.status, RunStatus::Complete);
    assert!(second.failed.is_empty());
    assert_eq!(store.count("tgmmh")?, 4);
    Ok(())
}

#[test]
fn test_concurrent_runs_sqlite_keep_keys_unique() -> Result<()> {
    let config = config();
    let dir = tempdir()?;
    let db = dir.path().join("ingest.db");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = db.clone();
            let config = config.clone();
            thread::spawn(move || -> Result<usize> {
                let mut store = SqliteStore::open(&db)?;
                let report = Pipeline::new(&config).run(&source(), &request(), &mut store)?;
                assert!(report.failed.is_empty(), "failures: {:?}", report.failed);
                Ok(report.inserted)
            })
        })
        .collect();

    let mut inserted = 0;
    for h in handles {
        inserted += h.join().expect("thread panicked")?;
    }

    assert_eq!(inserted, 4);
    let mut store = SqliteStore::open(&db)?;
    assert_eq!(store.count("tgmmh")?, 4);
    Ok(())
}

#[test]
fn test_concurrent_runs_in_memory_keep_keys_unique() -> Result<()> {
    let config = config();
    let store = InMemoryStore::new();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mut store = store.clone();
            let config = config.clone();
            thread::spawn(move || {
                Pipeline::new(&config)
                    .run(&source(), &request(), &mut store)
                    .map(|r| r.inserted)
            })
        })
        .collect();

    let inserted: usize = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .sum();

    assert_eq!(inserted, 4);
    let mut store = store;
    assert_eq!(store.count("tgmmh")?, 4);
    Ok(())
}

#[test]
fn test_ingest_workbook_file() -> Result<()> {
    let mut config = config();
    config.key_columns = vec!["source_file".into(), "import_date".into(), "Smith A".into()];
    let config = config.validated()?;
    let location = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/scenario.xlsx");
    let reader = reader_for(&location)?;
    let request = IngestRequest::new(&location, SHEET).with_ingestion_date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    let mut store = SqliteStore::open_in_memory()?;

    let report = Pipeline::new(&config).run(reader.as_ref(), &request, &mut store)?;
    assert_eq!(report.source_id, "scenario.xlsx");
    assert_eq!(report.total_rows, 2);
    assert_eq!(report.inserted, 2);
    assert_eq!(store.count("tgmmh")?, 2);
    Ok(())
}

#[test]
fn test_different_day_is_a_new_key() -> Result<()> {
    let config = config();
    let mut store = InMemoryStore::new();
    Pipeline::new(&config).run(&source(), &request(), &mut store)?;

    let next_day = request().with_ingestion_date(NaiveDate::from_ymd_opt(2024, 3, 16).unwrap());
    let report = Pipeline::new(&config).run(&source(), &next_day, &mut store)?;
    assert_eq!(report.inserted, 4);
    assert_eq!(store.count("tgmmh")?, 8);
    Ok(())
}

#[test]
fn test_column_collision_aborts_before_store_access() {
    let config = config();
    let rows = RecordSet::from_cells(
        vec!["Smith A".into(), "smith_a".into()],
        vec![vec![text("x"), text("y")]],
    );
    let source = StaticSource::new().with_sheet(SHEET, rows);
    let mut store = InMemoryStore::new();

    let err = Pipeline::new(&config)
        .run(&source, &request(), &mut store)
        .unwrap_err();
    assert!(matches!(err, IngestError::Schema(SchemaError::Collision { .. })));
    assert!(matches!(store.count("tgmmh"), Err(StoreError::UnknownTable(_))));
}

#[test]
fn test_unreadable_source_aborts_before_store_access() {
    let config = config();
    let mut store = InMemoryStore::new();
    let request = IngestRequest::new("whatever.xlsx", "Magic Data");

    let err = Pipeline::new(&config)
        .run(&source(), &request, &mut store)
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Source(SourceReadError::SubsetNotFound { .. })
    ));
    assert!(store.count("tgmmh").is_err());
}

#[test]
fn test_existing_table_without_columns_is_rejected() -> Result<()> {
    let config = config();
    let mut store = SqliteStore::open_in_memory()?;
    Pipeline::new(&config).run(&source(), &request(), &mut store)?;

    let wider = RecordSet::from_cells(
        vec!["Smith A".into(), "Smith B".into(), "Smith C".into(), "Extra".into()],
        vec![vec![text("a"), text("b"), text("c"), text("d")]],
    );
    let source = StaticSource::new().with_sheet(SHEET, wider);
    let err = Pipeline::new(&config)
        .run(&source, &request(), &mut store)
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Store(StoreError::TableMismatch { ref missing, .. }) if missing == &vec!["extra".to_string()]
    ));
    assert_eq!(store.count("tgmmh")?, 4);
    Ok(())
}
