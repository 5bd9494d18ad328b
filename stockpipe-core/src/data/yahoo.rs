//! Yahoo Finance history source.
//!
//! Fetches daily bars from Yahoo's v8 chart API and lays them out the way the
//! Yahoo `history()` table looks: `Date, Open, High, Low, Close, Volume, Dividends,
//! Stock Splits`, plus `Adj Close` when the response carries adjusted closes.
//!
//! One attempt per call. Rate limiting is handled by wrapping this source in
//! [`super::Throttled`], not by retrying here.

use super::provider::{DataError, DataSource, HistorySource, RawHistory};
use chrono::{DateTime, NaiveDate};
use polars::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    events: Option<ChartEvents>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartEvents {
    #[serde(default)]
    dividends: HashMap<String, DividendEvent>,
    #[serde(default)]
    splits: HashMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance history source.
pub struct YahooHistory {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl YahooHistory {
    pub fn new() -> Result<Self, DataError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the source at a different host (a local mirror or a test server).
    pub fn with_base_url(base_url: &str) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build the chart API URL for a symbol and date range.
    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end_ts = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(start_ts);
        format!(
            "{base}/v8/finance/chart/{symbol}\
             ?period1={start_ts}&period2={end_ts}&interval=1d\
             &includeAdjustedClose=true&events=div%2Csplits",
            base = self.base_url
        )
    }

    /// Parse the chart API response into a provider-labelled history frame.
    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<RawHistory, DataError> {
        let result = resp.chart.result.ok_or_else(|| {
            if let Some(err) = resp.chart.error {
                if err.code == "Not Found" {
                    DataError::SymbolNotFound {
                        symbol: symbol.to_string(),
                    }
                } else {
                    DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
                }
            } else {
                DataError::ResponseFormatChanged("empty result with no error".into())
            }
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

        // No timestamps means no trading days in the window
        let Some(timestamps) = data.timestamp else {
            return Ok(RawHistory::empty(symbol, DataSource::YahooFinance));
        };

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let offset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
        let to_date = |ts: i64| -> Result<NaiveDate, DataError> {
            DateTime::from_timestamp(ts + offset, 0)
                .map(|dt| dt.naive_utc().date())
                .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))
        };

        let events = data.events.unwrap_or_default();
        let mut dividends_by_date: HashMap<NaiveDate, f64> = HashMap::new();
        for event in events.dividends.values() {
            *dividends_by_date.entry(to_date(event.date)?).or_insert(0.0) += event.amount;
        }
        let mut splits_by_date: HashMap<NaiveDate, f64> = HashMap::new();
        for event in events.splits.values() {
            if event.denominator != 0.0 {
                splits_by_date.insert(to_date(event.date)?, event.numerator / event.denominator);
            }
        }

        let n = timestamps.len();
        let mut dates = Vec::with_capacity(n);
        let mut opens = Vec::with_capacity(n);
        let mut highs = Vec::with_capacity(n);
        let mut lows = Vec::with_capacity(n);
        let mut closes = Vec::with_capacity(n);
        let mut volumes = Vec::with_capacity(n);
        let mut dividends = Vec::with_capacity(n);
        let mut splits = Vec::with_capacity(n);
        let mut adjusted = Vec::with_capacity(n);

        for (i, &ts) in timestamps.iter().enumerate() {
            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Skip bars where all OHLCV are None (holidays/non-trading days)
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            let date = to_date(ts)?;
            dates.push(date);
            opens.push(open);
            highs.push(high);
            lows.push(low);
            closes.push(close);
            volumes.push(volume);
            dividends.push(dividends_by_date.get(&date).copied().unwrap_or(0.0));
            splits.push(splits_by_date.get(&date).copied().unwrap_or(0.0));
            adjusted.push(
                adj_closes
                    .as_ref()
                    .and_then(|v| v.get(i).copied().flatten()),
            );
        }

        if dates.is_empty() {
            return Ok(RawHistory::empty(symbol, DataSource::YahooFinance));
        }

        let mut columns = vec![
            Column::new("Date".into(), dates),
            Column::new("Open".into(), opens),
            Column::new("High".into(), highs),
            Column::new("Low".into(), lows),
            Column::new("Close".into(), closes),
            Column::new("Volume".into(), volumes),
            Column::new("Dividends".into(), dividends),
            Column::new("Stock Splits".into(), splits),
        ];
        if adj_closes.is_some() {
            columns.push(Column::new("Adj Close".into(), adjusted));
        }

        RawHistory::from_columns(symbol, columns, DataSource::YahooFinance)
    }
}

impl HistorySource for YahooHistory {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawHistory, DataError> {
        let url = self.chart_url(symbol, start, end);
        tracing::debug!(%symbol, %url, "requesting chart");

        let resp = self.client.get(&url).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                DataError::NetworkUnreachable(e.to_string())
            } else {
                DataError::Other(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(DataError::Blocked);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DataError::AuthenticationRequired(
                "Yahoo Finance requires authentication".into(),
            ));
        }
        // Yahoo answers unknown tickers with 404 and a chart error body
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(DataError::Other(format!("HTTP {status} for {symbol}")));
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })?;

        Self::parse_response(symbol, chart)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<RawHistory, DataError> {
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        YahooHistory::parse_response("AAPL", resp)
    }

    fn column_names(raw: &RawHistory) -> Vec<String> {
        raw.frame
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect()
    }

    #[test]
    fn parses_bars_with_adjusted_close_and_events() {
        let json = r#"{"chart":{"result":[{
            "meta":{"gmtoffset":-14400},
            "timestamp":[1704205800,1704292200,1704378600],
            "events":{
                "dividends":{"1704292200":{"amount":0.24,"date":1704292200}},
                "splits":{"1704378600":{"date":1704378600,"numerator":4,"denominator":1}}
            },
            "indicators":{
                "quote":[{
                    "open":[187.15,184.22,182.15],
                    "high":[188.44,185.88,183.09],
                    "low":[183.89,183.43,180.88],
                    "close":[185.64,184.25,181.91],
                    "volume":[82488700,58414500,71983600]
                }],
                "adjclose":[{"adjclose":[184.94,183.55,181.22]}]
            }
        }],"error":null}}"#;

        let raw = parse(json).unwrap();
        assert_eq!(raw.height(), 3);
        assert_eq!(
            column_names(&raw),
            vec![
                "Date", "Open", "High", "Low", "Close", "Volume", "Dividends", "Stock Splits",
                "Adj Close"
            ]
        );

        let dates = raw.frame.column("Date").unwrap().date().unwrap();
        assert_eq!(
            dates.as_date_iter().next().flatten(),
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );

        let dividends = raw.frame.column("Dividends").unwrap().f64().unwrap();
        assert_eq!(dividends.get(0), Some(0.0));
        assert_eq!(dividends.get(1), Some(0.24));

        let splits = raw.frame.column("Stock Splits").unwrap().f64().unwrap();
        assert_eq!(splits.get(2), Some(4.0));
    }

    #[test]
    fn omits_adjusted_close_when_absent() {
        let json = r#"{"chart":{"result":[{
            "timestamp":[1704205800],
            "indicators":{"quote":[{
                "open":[187.15],"high":[188.44],"low":[183.89],"close":[185.64],"volume":[82488700]
            }]}
        }],"error":null}}"#;

        let raw = parse(json).unwrap();
        assert!(!column_names(&raw).contains(&"Adj Close".to_string()));
    }

    #[test]
    fn skips_void_bars() {
        let json = r#"{"chart":{"result":[{
            "timestamp":[1704205800,1704292200],
            "indicators":{"quote":[{
                "open":[null,184.22],"high":[null,185.88],"low":[null,183.43],
                "close":[null,184.25],"volume":[null,58414500]
            }]}
        }],"error":null}}"#;

        let raw = parse(json).unwrap();
        assert_eq!(raw.height(), 1);
    }

    #[test]
    fn missing_timestamps_is_empty_not_error() {
        let json = r#"{"chart":{"result":[{
            "indicators":{"quote":[{}]}
        }],"error":null}}"#;

        let raw = parse(json).unwrap();
        assert!(raw.is_empty());
    }

    #[test]
    fn not_found_maps_to_symbol_error() {
        let json = r#"{"chart":{"result":null,"error":{
            "code":"Not Found","description":"No data found, symbol may be delisted"
        }}}"#;

        let err = parse(json).unwrap_err();
        assert!(matches!(err, DataError::SymbolNotFound { ref symbol } if symbol == "AAPL"));
    }

    #[test]
    fn chart_url_covers_whole_end_day() {
        let source = YahooHistory::with_base_url("http://localhost:9/").unwrap();
        let url = source.chart_url(
            "MSFT",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        );
        assert!(url.starts_with("http://localhost:9/v8/finance/chart/MSFT?"));
        assert!(url.contains("period1=1704067200"));
        assert!(url.contains("period2=1704239999"));
        assert!(url.contains("interval=1d"));
    }
}
