//! Randomized delay in front of every history fetch.
//!
//! Yahoo starts answering 429 when a batch of tickers is pulled back-to-back.
//! `Throttled` sleeps for a random interval before each call and then delegates
//! unchanged, so the only observable difference is added latency.

use super::provider::{DataError, HistorySource, RawHistory};
use chrono::NaiveDate;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error, PartialEq)]
pub enum DelayRangeError {
    #[error("delay bounds must be finite, got [{min}, {max}]")]
    NotFinite { min: f64, max: f64 },

    #[error("delay bounds must be non-negative, got [{min}, {max}]")]
    Negative { min: f64, max: f64 },

    #[error("minimum delay {min}s exceeds maximum {max}s")]
    Inverted { min: f64, max: f64 },
}

/// Closed range of seconds to sleep before a fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    min_secs: f64,
    max_secs: f64,
}

impl DelayRange {
    pub const DEFAULT_MIN_SECS: f64 = 2.0;
    pub const DEFAULT_MAX_SECS: f64 = 5.0;

    pub fn new(min_secs: f64, max_secs: f64) -> Result<Self, DelayRangeError> {
        if !min_secs.is_finite() || !max_secs.is_finite() {
            return Err(DelayRangeError::NotFinite {
                min: min_secs,
                max: max_secs,
            });
        }
        if min_secs < 0.0 || max_secs < 0.0 {
            return Err(DelayRangeError::Negative {
                min: min_secs,
                max: max_secs,
            });
        }
        if min_secs > max_secs {
            return Err(DelayRangeError::Inverted {
                min: min_secs,
                max: max_secs,
            });
        }
        Ok(Self { min_secs, max_secs })
    }

    pub fn min_secs(&self) -> f64 {
        self.min_secs
    }

    pub fn max_secs(&self) -> f64 {
        self.max_secs
    }

    /// Draw a delay uniformly from the range.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs_f64(rng.gen_range(self.min_secs..=self.max_secs))
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min_secs: Self::DEFAULT_MIN_SECS,
            max_secs: Self::DEFAULT_MAX_SECS,
        }
    }
}

/// A history source that sleeps a random interval before every fetch.
///
/// Wrapping an already throttled source stacks the delays.
pub struct Throttled<S> {
    inner: S,
    range: DelayRange,
}

impl<S: HistorySource> Throttled<S> {
    pub fn new(inner: S, range: DelayRange) -> Self {
        Self { inner, range }
    }

    pub fn range(&self) -> DelayRange {
        self.range
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: HistorySource> HistorySource for Throttled<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawHistory, DataError> {
        let delay = self.range.sample(&mut rand::thread_rng());
        info!(
            "Adding {:.2}s delay before API call for {symbol}",
            delay.as_secs_f64()
        );
        std::thread::sleep(delay);
        self.inner.history(symbol, start, end)
    }
}

/// Put the fetch delay in front of `source`.
///
/// Returns the source to use and whether the delay was applied. Bad bounds are
/// logged and the source is handed back unwrapped; this never fails the pipeline.
pub fn apply_fetch_delay(
    source: Box<dyn HistorySource>,
    min_secs: f64,
    max_secs: f64,
) -> (Box<dyn HistorySource>, bool) {
    match DelayRange::new(min_secs, max_secs) {
        Ok(range) => {
            info!(
                source = source.name(),
                "Applied fetch delay of {:.2}-{:.2}s",
                range.min_secs(),
                range.max_secs()
            );
            (Box::new(Throttled::new(source, range)), true)
        }
        Err(e) => {
            error!("Failed to apply fetch delay: {e}");
            (source, false)
        }
    }
}
