//! Warehouse sinks.
//!
//! The pipeline only ever replaces a table wholesale. There is no append or merge
//! path; every run rebuilds the destination from the current history window.

pub mod bigquery;
pub mod credentials;

pub use bigquery::BigQuerySink;
pub use credentials::{AccessToken, ServiceAccountKey, BIGQUERY_SCOPE};

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fatal warehouse errors. None of these are retried.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("failed to encode table: {0}")]
    Encode(String),

    #[error("unsupported column type for '{column}': {dtype}")]
    UnsupportedType { column: String, dtype: String },

    #[error("warehouse request failed: {0}")]
    Http(String),

    #[error("load job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("load job {job_id} did not finish within {waited_secs}s")]
    Timeout { job_id: String, waited_secs: u64 },
}

/// Fully-qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// `dataset.table`, the form used inside the project.
    pub fn dataset_table(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Outcome of a successful load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub job_id: String,
    pub rows: usize,
}

/// A warehouse that can atomically replace a table's contents.
pub trait WarehouseSink: Send + Sync {
    fn name(&self) -> &str;

    /// Replace `table` with `frame`, creating it if needed.
    fn replace_table(
        &self,
        table: &TableRef,
        frame: &mut DataFrame,
    ) -> Result<LoadStats, WarehouseError>;
}
