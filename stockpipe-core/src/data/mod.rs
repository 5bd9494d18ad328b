//! Market data retrieval and normalization

pub mod columns;
pub mod normalize;
pub mod provider;
pub mod schema;
pub mod throttle;
pub mod yahoo;

pub use columns::unique_labels;
pub use normalize::{CombinedTable, Normalizer};
pub use provider::{DataError, DataSource, HistorySource, RawHistory};
pub use schema::{PriceSchema, SchemaError};
pub use throttle::{apply_fetch_delay, DelayRange, DelayRangeError, Throttled};
pub use yahoo::YahooHistory;
