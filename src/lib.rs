pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod types;

pub use config::{IngestConfig, OnStoreError};
pub use error::{IngestError, Result};
pub use pipeline::{IngestReport, IngestRequest, Pipeline, RunStatus};
pub use types::{ColumnType, Key, RecordSet, Row, Value};
