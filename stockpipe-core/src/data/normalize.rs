use super::provider::{DataError, RawHistory};
use super::schema::PriceSchema;
use chrono::{NaiveDateTime, Timelike};
use polars::prelude::*;

/// Reshapes provider frames into the warehouse column contract.
pub struct Normalizer;

impl Normalizer {
    /// Keep the recognized source columns that are present, rename them to
    /// canonical names and tag every row with the symbol.
    pub fn normalize(raw: &RawHistory) -> Result<DataFrame, DataError> {
        let schema = raw.frame.schema();
        let selected: Vec<Expr> = PriceSchema::SOURCE_COLUMNS
            .iter()
            .filter(|(source, _)| schema.contains(source))
            .map(|(source, canonical)| col(*source).alias(*canonical))
            .collect();

        let df = raw
            .frame
            .clone()
            .lazy()
            .select(selected)
            .with_column(lit(raw.symbol.as_str()).alias(PriceSchema::SYMBOL))
            .collect()?;

        Ok(df)
    }

    /// Add load metadata columns. Sub-second precision is dropped so the
    /// warehouse sees the same value whether it stores seconds or micros.
    pub fn stamp(df: DataFrame, load_timestamp: NaiveDateTime) -> PolarsResult<DataFrame> {
        let load_timestamp = load_timestamp.with_nanosecond(0).unwrap_or(load_timestamp);
        df.lazy()
            .with_columns([
                lit(load_timestamp)
                    .cast(DataType::Datetime(TimeUnit::Microseconds, None))
                    .alias(PriceSchema::LOAD_TIMESTAMP),
                lit(load_timestamp.date())
                    .cast(DataType::Date)
                    .alias(PriceSchema::LOAD_DATE),
            ])
            .collect()
    }
}

/// The in-memory accumulation of normalized rows for one run.
///
/// Parts are kept in fetch order and concatenated diagonally on [`finish`], so the
/// final column set is the union of what each symbol actually had.
///
/// [`finish`]: CombinedTable::finish
#[derive(Debug, Default)]
pub struct CombinedTable {
    parts: Vec<DataFrame>,
    rows_per_symbol: Vec<(String, usize)>,
}

impl CombinedTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one symbol's normalized rows. Empty frames are ignored.
    pub fn push(&mut self, symbol: &str, part: DataFrame) {
        let rows = part.height();
        if rows == 0 {
            return;
        }
        match self.rows_per_symbol.iter_mut().find(|(s, _)| s == symbol) {
            Some((_, count)) => *count += rows,
            None => self.rows_per_symbol.push((symbol.to_string(), rows)),
        }
        self.parts.push(part);
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn row_count(&self) -> usize {
        self.parts.iter().map(|p| p.height()).sum()
    }

    /// Distinct symbols in order of first appearance.
    pub fn symbols(&self) -> Vec<&str> {
        self.rows_per_symbol.iter().map(|(s, _)| s.as_str()).collect()
    }

    pub fn rows_per_symbol(&self) -> &[(String, usize)] {
        &self.rows_per_symbol
    }

    /// Concatenate every part and stamp the load metadata.
    pub fn finish(self, load_timestamp: NaiveDateTime) -> PolarsResult<DataFrame> {
        if self.parts.is_empty() {
            return Err(PolarsError::NoData("combined table has no rows".into()));
        }
        let frames: Vec<LazyFrame> = self.parts.into_iter().map(|p| p.lazy()).collect();
        let combined = concat_lf_diagonal(frames, UnionArgs::default())?.collect()?;
        Normalizer::stamp(combined, load_timestamp)
    }
}
