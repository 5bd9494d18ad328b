//! Extraction-and-load task.
//!
//! Walks the configured symbols one at a time, normalizes whatever each fetch
//! returns into the combined table, then replaces the warehouse table with it.
//! A symbol that errors or comes back empty is logged and skipped. Only a run
//! where every symbol was skipped is fatal.

use chrono::{Local, NaiveDate, NaiveDateTime, TimeDelta};
use polars::prelude::{DataFrame, PolarsError};
use serde::{Deserialize, Serialize};
use stockpipe_core::data::{
    CombinedTable, DataError, HistorySource, Normalizer, PriceSchema, SchemaError,
};
use stockpipe_core::warehouse::{TableRef, WarehouseError, WarehouseSink};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("No stock data could be retrieved")]
    NoData,

    #[error("a {days}-day history window ending {end} falls outside the supported date range")]
    WindowOutOfRange { days: i64, end: NaiveDate },

    #[error("failed to assemble combined table: {0}")]
    Frame(#[from] PolarsError),

    #[error("combined table violates the load contract: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// What the load task hands to the summary task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractResult {
    /// ISO-8601 time the load finished.
    pub load_time: String,
    pub rows_loaded: usize,
    /// Distinct symbols in order of first appearance, comma-joined.
    pub symbols_loaded: String,
    /// `project.dataset.table`
    pub target: String,
}

impl ExtractResult {
    /// Key/value pairs in declaration order, for logging.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("load_time", self.load_time.clone()),
            ("rows_loaded", self.rows_loaded.to_string()),
            ("symbols_loaded", self.symbols_loaded.clone()),
            ("target", self.target.clone()),
        ]
    }
}

/// Inputs of one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub symbols: Vec<String>,
    pub history_days: i64,
    pub table: TableRef,
}

impl ExtractRequest {
    /// `[today - history_days, today]`
    pub fn window(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ExtractError> {
        history_start(today, self.history_days)
            .map(|start| (start, today))
            .ok_or(ExtractError::WindowOutOfRange {
                days: self.history_days,
                end: today,
            })
    }
}

/// First day of a `days`-long window ending `end`, if representable.
pub fn history_start(end: NaiveDate, days: i64) -> Option<NaiveDate> {
    TimeDelta::try_days(days).and_then(|span| end.checked_sub_signed(span))
}

/// How a single symbol's fetch ended.
#[derive(Debug)]
pub enum SymbolOutcome {
    Loaded { rows: usize, columns: Vec<String> },
    Empty,
    Failed(DataError),
}

/// Progress callbacks for the per-symbol loop.
pub trait ExtractProgress {
    /// Called before fetching a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol's fetch has been handled.
    fn on_complete(&self, symbol: &str, index: usize, total: usize, outcome: &SymbolOutcome);

    /// Called once every symbol has been attempted.
    fn on_batch_complete(&self, loaded: usize, skipped: usize, total: usize);
}

/// Progress reporter that writes to the tracing log.
pub struct LogProgress;

impl ExtractProgress for LogProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        info!("[{}/{}] Downloading data for {symbol}...", index + 1, total);
    }

    fn on_complete(&self, symbol: &str, _index: usize, _total: usize, outcome: &SymbolOutcome) {
        match outcome {
            SymbolOutcome::Loaded { rows, columns } => {
                info!("Columns for {symbol}: {columns:?}");
                info!("Downloaded {rows} rows for {symbol}");
            }
            SymbolOutcome::Empty => info!("No data found for {symbol}"),
            SymbolOutcome::Failed(e) => warn!("Error downloading {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, loaded: usize, skipped: usize, total: usize) {
        info!("Extraction complete: {loaded}/{total} symbols loaded, {skipped} skipped");
    }
}

/// Fetch every symbol in order and accumulate the normalized rows.
///
/// Never fails: per-symbol problems are reported through `progress` and skipped.
pub fn collect_history(
    source: &dyn HistorySource,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    progress: &dyn ExtractProgress,
) -> CombinedTable {
    let total = symbols.len();
    let mut table = CombinedTable::new();
    let mut loaded = 0;

    for (i, symbol) in symbols.iter().enumerate() {
        progress.on_start(symbol, i, total);

        let outcome = match source.history(symbol, start, end) {
            Ok(raw) if raw.is_empty() => SymbolOutcome::Empty,
            Ok(raw) => match Normalizer::normalize(&raw) {
                Ok(part) => {
                    let outcome = SymbolOutcome::Loaded {
                        rows: part.height(),
                        columns: part
                            .get_column_names()
                            .iter()
                            .map(|n| n.to_string())
                            .collect(),
                    };
                    table.push(symbol, part);
                    outcome
                }
                Err(e) => SymbolOutcome::Failed(e),
            },
            Err(e) => SymbolOutcome::Failed(e),
        };

        if matches!(outcome, SymbolOutcome::Loaded { .. }) {
            loaded += 1;
        }
        progress.on_complete(symbol, i, total, &outcome);
    }

    progress.on_batch_complete(loaded, total - loaded, total);
    table
}

fn log_table_details(df: &DataFrame, rows_per_symbol: &[(String, usize)]) {
    info!("Final dataframe shape: ({}, {})", df.height(), df.width());
    let columns: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
    info!("Columns: {columns:?}");
    let dtypes: Vec<String> = df
        .get_columns()
        .iter()
        .map(|c| format!("{}: {}", c.name(), c.dtype()))
        .collect();
    info!("Data types: {dtypes:?}");
    info!("First 3 rows sample:\n{}", df.head(Some(3)));
    info!("Rows per stock: {rows_per_symbol:?}");
}

/// Run the extraction-and-load task against `source` and `sink`.
pub fn extract_and_load(
    source: &dyn HistorySource,
    sink: &dyn WarehouseSink,
    request: &ExtractRequest,
    progress: &dyn ExtractProgress,
) -> Result<ExtractResult, ExtractError> {
    info!("Starting extraction for: {:?}", request.symbols);
    let (start, end) = request.window(Local::now().date_naive())?;

    let table = collect_history(source, &request.symbols, start, end, progress);
    if table.is_empty() {
        return Err(ExtractError::NoData);
    }

    let symbols_loaded = table.symbols().join(",");
    let load_timestamp: NaiveDateTime = Local::now().naive_local();
    let rows_per_symbol = table.rows_per_symbol().to_vec();
    let mut combined = table.finish(load_timestamp)?;
    log_table_details(&combined, &rows_per_symbol);
    PriceSchema::validate(&combined)?;

    let stats = sink.replace_table(&request.table, &mut combined)?;
    info!(
        job_id = %stats.job_id,
        "Loaded {} rows into {} via {}",
        stats.rows,
        request.table,
        sink.name()
    );

    Ok(ExtractResult {
        load_time: Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        rows_loaded: combined.height(),
        symbols_loaded,
        target: request.table.to_string(),
    })
}
