//! Recurring trigger for the pipeline.

use chrono::{Duration, NaiveDate, NaiveDateTime};

/// Scheduler-level settings of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub dag_id: &'static str,
    pub description: &'static str,
    pub interval: Duration,
    pub start: NaiveDateTime,
    /// Whether missed intervals before "now" get backfilled.
    pub catchup: bool,
    pub tags: &'static [&'static str],
}

impl Schedule {
    /// Daily at midnight from 2023-01-01, no catch-up.
    pub fn daily() -> Self {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self {
            dag_id: "stock_market_pipeline",
            description: "A streamlined ELT pipeline for stock market data",
            interval: Duration::days(1),
            start,
            catchup: false,
            tags: &["stocks", "yfinance", "bigquery", "dbt", "elt"],
        }
    }

    /// The first interval boundary strictly after `now`.
    ///
    /// Before the start date this is the start itself. With catch-up off, past
    /// boundaries are never returned.
    pub fn next_run_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        if now < self.start {
            return self.start;
        }
        let step = self.interval.num_seconds().max(1);
        let elapsed = (now - self.start).num_seconds();
        let k = elapsed / step + 1;
        self.start + Duration::seconds(k * step)
    }

    /// How long to wait from `now` until the next run.
    pub fn wait_from(&self, now: NaiveDateTime) -> std::time::Duration {
        (self.next_run_after(now) - now)
            .to_std()
            .unwrap_or_default()
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::daily()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn daily_settings() {
        let s = Schedule::daily();
        assert_eq!(s.dag_id, "stock_market_pipeline");
        assert_eq!(s.interval, Duration::days(1));
        assert_eq!(s.start, at(2023, 1, 1, 0, 0, 0));
        assert!(!s.catchup);
        assert!(s.tags.contains(&"dbt"));
    }

    #[test]
    fn next_run_is_following_midnight() {
        let s = Schedule::daily();
        assert_eq!(s.next_run_after(at(2025, 3, 1, 13, 45, 0)), at(2025, 3, 2, 0, 0, 0));
    }

    #[test]
    fn exact_boundary_moves_to_next_day() {
        let s = Schedule::daily();
        assert_eq!(s.next_run_after(at(2025, 3, 1, 0, 0, 0)), at(2025, 3, 2, 0, 0, 0));
    }

    #[test]
    fn before_start_waits_for_start() {
        let s = Schedule::daily();
        assert_eq!(s.next_run_after(at(2022, 6, 1, 8, 0, 0)), s.start);
    }

    #[test]
    fn wait_is_positive_and_at_most_one_interval() {
        let s = Schedule::daily();
        let wait = s.wait_from(at(2025, 3, 1, 23, 59, 30));
        assert_eq!(wait, std::time::Duration::from_secs(30));
        let wait = s.wait_from(at(2025, 3, 1, 0, 0, 0));
        assert_eq!(wait, std::time::Duration::from_secs(86_400));
    }
}
