//! Stockpipe Core: data layer for the daily stock price pipeline.
//!
//! This crate contains everything that touches market data or the warehouse:
//! - The `HistorySource` adapter trait and the Yahoo Finance implementation
//! - The randomized fetch delay that keeps the provider from rate limiting us
//! - Column label deduplication and per-symbol normalization
//! - The combined table accumulated across symbols for one run
//! - The `WarehouseSink` trait and the BigQuery full-replace loader

pub mod data;
pub mod warehouse;
