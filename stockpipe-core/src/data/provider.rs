//! History source trait and structured error types.
//!
//! `HistorySource` is the pipeline's own adapter over a market data client. The
//! extraction task only ever talks to this trait, so the fetch delay can be layered
//! on as a wrapper and tests can swap in canned frames.

use super::columns::unique_labels;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-symbol fetch errors.
///
/// None of these abort a run on their own: the extraction task logs them and
/// moves on to the next symbol.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider refused the request (HTTP 403)")]
    Blocked,

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("frame error: {0}")]
    Frame(String),

    #[error("data error: {0}")]
    Other(String),
}

impl From<PolarsError> for DataError {
    fn from(e: PolarsError) -> Self {
        DataError::Frame(e.to_string())
    }
}

/// Where a history frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    YahooFinance,
    Fixture,
}

/// Price history for one symbol, exactly as the provider labelled it.
///
/// The frame carries provider column names (`Date`, `Open`, `Adj Close`, ...).
/// Renaming to the warehouse contract happens in [`super::Normalizer`].
#[derive(Debug, Clone)]
pub struct RawHistory {
    pub symbol: String,
    pub frame: DataFrame,
    pub source: DataSource,
}

impl RawHistory {
    /// Build a history frame from provider columns.
    ///
    /// Duplicate labels are suffixed (`Close`, `Close.1`) before the frame is
    /// assembled, so a provider that repeats a label never fails the fetch.
    pub fn from_columns(
        symbol: &str,
        mut columns: Vec<Column>,
        source: DataSource,
    ) -> Result<Self, DataError> {
        let labels: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
        for (column, label) in columns.iter_mut().zip(unique_labels(&labels)) {
            column.rename(label.into());
        }

        Ok(Self {
            symbol: symbol.to_string(),
            frame: DataFrame::new(columns)?,
            source,
        })
    }

    /// A fetch that succeeded but returned no rows.
    pub fn empty(symbol: &str, source: DataSource) -> Self {
        Self {
            symbol: symbol.to_string(),
            frame: DataFrame::empty(),
            source,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }
}

/// A market data client seen through the pipeline's adapter.
pub trait HistorySource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch daily history for a symbol over `[start, end]`.
    ///
    /// An empty result is `Ok` with an empty frame, not an error.
    fn history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawHistory, DataError>;
}

impl<S: HistorySource + ?Sized> HistorySource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawHistory, DataError> {
        (**self).history(symbol, start, end)
    }
}
