use polars::prelude::*;

/// Column contract for the price table written to the warehouse.
pub struct PriceSchema;

impl PriceSchema {
    pub const DATE: &'static str = "date";
    pub const OPEN: &'static str = "open";
    pub const HIGH: &'static str = "high";
    pub const LOW: &'static str = "low";
    pub const CLOSE: &'static str = "close";
    pub const VOLUME: &'static str = "volume";
    pub const ADJ_CLOSE: &'static str = "adj_close";
    pub const SYMBOL: &'static str = "symbol";
    pub const LOAD_TIMESTAMP: &'static str = "load_timestamp";
    pub const LOAD_DATE: &'static str = "load_date";

    /// Provider labels we keep, paired with their canonical names.
    ///
    /// `Adj Close` is only present when the provider returns adjusted closes.
    pub const SOURCE_COLUMNS: [(&'static str, &'static str); 7] = [
        ("Date", Self::DATE),
        ("Open", Self::OPEN),
        ("High", Self::HIGH),
        ("Low", Self::LOW),
        ("Close", Self::CLOSE),
        ("Volume", Self::VOLUME),
        ("Adj Close", Self::ADJ_CLOSE),
    ];

    /// Columns every loaded row must carry with a non-null value.
    pub const REQUIRED_NON_NULL: [&'static str; 3] =
        [Self::SYMBOL, Self::LOAD_TIMESTAMP, Self::LOAD_DATE];

    /// Check a stamped table before it leaves the process.
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        for name in Self::REQUIRED_NON_NULL {
            let column = df
                .column(name)
                .map_err(|_| SchemaError::MissingColumn(name.to_string()))?;
            let nulls = column.null_count();
            if nulls > 0 {
                return Err(SchemaError::NullValues {
                    column: name.to_string(),
                    count: nulls,
                });
            }
        }

        let symbol_dtype = df.schema().get(Self::SYMBOL).cloned();
        if let Some(dtype) = symbol_dtype {
            if dtype != DataType::String {
                return Err(SchemaError::TypeMismatch {
                    column: Self::SYMBOL.to_string(),
                    expected: DataType::String,
                    actual: dtype,
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Column {column} has {count} null values")]
    NullValues { column: String, count: usize },

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
