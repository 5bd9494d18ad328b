//! Load-summary task: human-readable aggregates of what the load task did.

use crate::extract::ExtractResult;
use tracing::info;

/// Aggregates derived from an [`ExtractResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub rows: usize,
    pub symbol_count: usize,
    pub average_rows_per_symbol: f64,
}

impl LoadSummary {
    pub fn from_result(result: &ExtractResult) -> Self {
        let symbol_count = result
            .symbols_loaded
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .count();
        let average_rows_per_symbol = if symbol_count == 0 {
            0.0
        } else {
            result.rows_loaded as f64 / symbol_count as f64
        };

        Self {
            rows: result.rows_loaded,
            symbol_count,
            average_rows_per_symbol,
        }
    }
}

/// Log every field of the load result followed by the aggregates.
pub fn log_load_results(result: &ExtractResult) -> LoadSummary {
    info!("==== LOAD SUMMARY ====");
    for (key, value) in result.entries() {
        info!("{key}: {value}");
    }

    let summary = LoadSummary::from_result(result);
    info!(
        "Loaded {} total rows for {} symbols",
        summary.rows, summary.symbol_count
    );
    info!(
        "Average rows per symbol: {:.1}",
        summary.average_rows_per_symbol
    );
    info!("=======================");
    summary
}
