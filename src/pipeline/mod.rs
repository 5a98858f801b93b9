// Ingestion pipeline: read -> normalize -> impute -> enrich -> keyed insert

pub mod enrich;
pub mod impute;
pub mod inserter;
pub mod normalize;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{IngestConfig, OnStoreError};
use crate::error::{Result, SchemaError};
use crate::source::SourceReader;
use crate::store::{ColumnDef, Store, TableSchema};
use crate::types::{Key, RecordSet};

use self::enrich::Provenance;
use self::impute::{impute_record_set, infer_column_types, ColumnTypes};
use self::inserter::{insert_keyed, InsertOutcome};
use self::normalize::{normalize_column, normalize_record_set};

/// One ingestion run: which document and sheet to read, and optionally the
/// provenance to stamp instead of the defaults.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub location: PathBuf,
    pub subset: String,
    /// Defaults to the file name of `location`
    pub source_id: Option<String>,
    /// Defaults to today's local date
    pub ingestion_date: Option<NaiveDate>,
}

impl IngestRequest {
    pub fn new(location: impl Into<PathBuf>, subset: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            subset: subset.into(),
            source_id: None,
            ingestion_date: None,
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_ingestion_date(mut self, date: NaiveDate) -> Self {
        self.ingestion_date = Some(date);
        self
    }

    fn resolved_source_id(&self) -> String {
        self.source_id
            .clone()
            .unwrap_or_else(|| source_id_from_location(&self.location))
    }
}

/// The last path component of a location, or the whole location if it has none.
pub fn source_id_from_location(location: &Path) -> String {
    location
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.display().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every row was inserted or skipped as a duplicate
    Complete,
    /// At least one row failed to persist; see `failed`
    Partial,
    /// The run was stopped between rows
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    /// 1-based data row number in the source
    pub row: usize,
    pub key: String,
    pub error: String,
}

/// Result of a completed (possibly partial) run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub table: String,
    pub source_id: String,
    pub ingestion_date: NaiveDate,
    pub total_rows: usize,
    pub inserted: usize,
    pub skipped: usize,
    /// 1-based row numbers skipped as duplicates
    pub skipped_rows: Vec<usize>,
    pub failed: Vec<RowFailure>,
    pub not_attempted: usize,
    pub status: RunStatus,
}

/// Rows ready for insertion, plus the table layout they need.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub schema: TableSchema,
    pub records: RecordSet,
}

pub struct Pipeline<'a> {
    config: &'a IngestConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a IngestConfig) -> Self {
        Self { config, cancel: None }
    }

    /// Stops the run before the next row once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn provenance(&self, request: &IngestRequest) -> Provenance {
        Provenance::new(
            request.resolved_source_id(),
            request
                .ingestion_date
                .unwrap_or_else(|| Local::now().date_naive()),
            normalize_column(&self.config.source_identifier_column),
            normalize_column(&self.config.ingestion_date_column),
        )
    }

    /// Runs the pure stages for a table that does not exist yet: normalize
    /// column names, infer types, impute missing values, stamp provenance, and
    /// derive the table layout.
    pub fn prepare(&self, raw: &RecordSet, provenance: &Provenance) -> std::result::Result<PreparedBatch, SchemaError> {
        self.prepare_against(raw, provenance, &ColumnTypes::new())
    }

    /// Like `prepare`, but columns the target table already has keep the type
    /// stored there, so a rerun fills missing cells the way the first run did.
    /// Configured `column_types` override both stored and inferred types.
    pub fn prepare_against(
        &self,
        raw: &RecordSet,
        provenance: &Provenance,
        stored_types: &ColumnTypes,
    ) -> std::result::Result<PreparedBatch, SchemaError> {
        let key_columns: Vec<String> = self.config.key_columns.iter().map(|c| normalize_column(c)).collect();
        if key_columns.is_empty() {
            return Err(SchemaError::NoKeyColumns);
        }
        for (i, key) in key_columns.iter().enumerate() {
            if key_columns[..i].contains(key) {
                return Err(SchemaError::DuplicateKeyColumn(key.clone()));
            }
        }
        if provenance.source_column == provenance.date_column {
            return Err(SchemaError::ProvenanceColumnsEqual(provenance.source_column.clone()));
        }

        let normalized = normalize_record_set(raw)?;

        let mut column_types = infer_column_types(&normalized);
        for (column, ty) in stored_types.iter().chain(&self.config.column_types) {
            if let Some(slot) = column_types.get_mut(&normalize_column(column)) {
                *slot = *ty;
            }
        }

        let imputed = impute_record_set(&normalized, &column_types, &self.config.default_fill_policy);
        let enriched = provenance.enrich_record_set(&imputed)?;

        let mut columns: Vec<ColumnDef> = normalized
            .columns()
            .iter()
            .map(|name| ColumnDef {
                name: name.clone(),
                ty: column_types[name],
            })
            .collect();
        columns.extend(
            provenance
                .columns()
                .into_iter()
                .map(|(name, ty)| ColumnDef { name, ty }),
        );

        let schema = TableSchema {
            name: self.config.table_name.clone(),
            columns,
            key_columns,
        };
        if let Some(missing) = schema
            .key_columns
            .iter()
            .find(|k| schema.column_type(k).is_none())
        {
            return Err(SchemaError::MissingKeyColumn(missing.clone()));
        }

        Ok(PreparedBatch {
            schema,
            records: enriched,
        })
    }

    /// Reads the source, prepares the rows and inserts them one by one in
    /// source order.
    ///
    /// Source and schema problems abort before anything is written. Per-row
    /// store failures are reported in the returned `IngestReport`.
    pub fn run<R, S>(&self, reader: &R, request: &IngestRequest, store: &mut S) -> Result<IngestReport>
    where
        R: SourceReader + ?Sized,
        S: Store,
    {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("ingest", run_id = %run_id, table = %self.config.table_name);
        let _enter = span.enter();

        info!(location = %request.location.display(), subset = %request.subset, "Reading source");
        let raw = reader.read(&request.location, &request.subset).map_err(|e| {
            error!("Source read failed: {}", e);
            e
        })?;
        info!(rows = raw.len(), columns = raw.columns().len(), "Read source rows");

        let stored_types = store.column_types(&self.config.table_name)?.unwrap_or_default();
        if !stored_types.is_empty() {
            debug!(columns = stored_types.len(), "Using column types of existing table");
        }

        let provenance = self.provenance(request);
        let batch = self.prepare_against(&raw, &provenance, &stored_types).map_err(|e| {
            error!("Schema check failed: {}", e);
            e
        })?;

        store.ensure_table(&batch.schema)?;

        let report = self.insert_all(run_id, &provenance, &batch, store);
        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failed.len(),
            not_attempted = report.not_attempted,
            status = ?report.status,
            "Ingestion finished"
        );
        Ok(report)
    }

    fn insert_all<S: Store>(
        &self,
        run_id: Uuid,
        provenance: &Provenance,
        batch: &PreparedBatch,
        store: &mut S,
    ) -> IngestReport {
        let rows = batch.records.rows();
        let mut report = IngestReport {
            run_id,
            table: batch.schema.name.clone(),
            source_id: provenance.source_id.clone(),
            ingestion_date: provenance.ingestion_date,
            total_rows: rows.len(),
            inserted: 0,
            skipped: 0,
            skipped_rows: Vec::new(),
            failed: Vec::new(),
            not_attempted: 0,
            status: RunStatus::Complete,
        };

        for (i, row) in rows.iter().enumerate() {
            let row_number = i + 1;
            if self.is_cancelled() {
                warn!(row = row_number, "Run cancelled");
                report.not_attempted = rows.len() - i;
                report.status = RunStatus::Cancelled;
                return report;
            }

            // prepare() checked that every key column exists
            let key = match Key::from_row(row, &batch.schema.key_columns) {
                Ok(key) => key,
                Err(column) => {
                    report.failed.push(RowFailure {
                        row: row_number,
                        key: String::new(),
                        error: SchemaError::MissingKeyColumn(column).to_string(),
                    });
                    continue;
                }
            };

            match insert_keyed(store, &batch.schema, row, &key) {
                Ok(InsertOutcome::Inserted) => {
                    debug!(row = row_number, key = %key, "Inserted row");
                    report.inserted += 1;
                }
                Ok(InsertOutcome::Skipped(reason)) => {
                    debug!(row = row_number, key = %key, ?reason, "Skipped duplicate row");
                    report.skipped += 1;
                    report.skipped_rows.push(row_number);
                }
                Err(e) => {
                    warn!(row = row_number, key = %key, fingerprint = %key.fingerprint(), "Store error: {}", e);
                    report.failed.push(RowFailure {
                        row: row_number,
                        key: key.to_string(),
                        error: e.to_string(),
                    });
                    if self.config.on_store_error == OnStoreError::Abort {
                        report.not_attempted = rows.len() - row_number;
                        break;
                    }
                }
            }
        }

        if !report.failed.is_empty() {
            report.status = RunStatus::Partial;
        }
        report
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}
