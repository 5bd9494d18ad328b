//! Pipeline configuration.
//!
//! Three layers, later wins: built-in defaults, an optional TOML file, then
//! environment variables. Required warehouse fields are checked by
//! [`PipelineConfig::validate`] before a run starts, not at parse time, so
//! `next-run` and friends work with a partial environment.

use crate::extract::history_start;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stockpipe_core::data::DelayRange;
use stockpipe_core::warehouse::TableRef;
use thiserror::Error;

pub const ENV_SYMBOLS: &str = "STOCK_SYMBOLS";
pub const ENV_PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const ENV_DATASET_ID: &str = "BIGQUERY_DATASET_ID";
pub const ENV_TABLE_ID: &str = "BIGQUERY_TABLE_ID";
pub const ENV_HISTORY_DAYS: &str = "STOCK_HISTORY_DAYS";
pub const ENV_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
pub const ENV_DBT_PROJECT_DIR: &str = "DBT_PROJECT_DIR";
pub const ENV_DBT_TARGET_PATH: &str = "DBT_TARGET_PATH";
pub const ENV_DBT_BIN: &str = "DBT_BIN";
pub const ENV_DELAY_MIN: &str = "FETCH_DELAY_MIN_SECS";
pub const ENV_DELAY_MAX: &str = "FETCH_DELAY_MAX_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("missing required setting {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub project_id: Option<String>,
    pub dataset_id: Option<String>,
    pub table_id: Option<String>,
    pub credentials_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbtConfig {
    pub project_dir: PathBuf,
    pub target_path: PathBuf,
    pub executable: String,
}

impl Default for DbtConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("/opt/airflow/dbt_project"),
            target_path: PathBuf::from("/tmp/dbt_target"),
            executable: "dbt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchDelayConfig {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl Default for FetchDelayConfig {
    fn default() -> Self {
        Self {
            min_secs: DelayRange::DEFAULT_MIN_SECS,
            max_secs: DelayRange::DEFAULT_MAX_SECS,
        }
    }
}

/// Everything a run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ticker symbols, fetched in this order. Duplicates are not removed.
    pub symbols: Vec<String>,
    /// History window length, ending today.
    pub history_days: i64,
    pub warehouse: WarehouseConfig,
    pub dbt: DbtConfig,
    pub fetch_delay: FetchDelayConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            history_days: 365,
            warehouse: WarehouseConfig::default(),
            dbt: DbtConfig::default(),
            fetch_delay: FetchDelayConfig::default(),
        }
    }
}

/// Split a comma-separated symbol list, trimming whitespace and dropping blanks.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl PipelineConfig {
    /// Load a TOML config file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_SYMBOLS) {
            self.symbols = parse_symbols(&v);
        }
        if let Some(v) = lookup(ENV_HISTORY_DAYS) {
            self.history_days = parse_number(ENV_HISTORY_DAYS, &v)?;
        }
        if let Some(v) = lookup(ENV_PROJECT_ID) {
            self.warehouse.project_id = Some(v);
        }
        if let Some(v) = lookup(ENV_DATASET_ID) {
            self.warehouse.dataset_id = Some(v);
        }
        if let Some(v) = lookup(ENV_TABLE_ID) {
            self.warehouse.table_id = Some(v);
        }
        if let Some(v) = lookup(ENV_CREDENTIALS) {
            self.warehouse.credentials_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_DBT_PROJECT_DIR) {
            self.dbt.project_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_DBT_TARGET_PATH) {
            self.dbt.target_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_DBT_BIN) {
            self.dbt.executable = v;
        }
        if let Some(v) = lookup(ENV_DELAY_MIN) {
            self.fetch_delay.min_secs = parse_number(ENV_DELAY_MIN, &v)?;
        }
        if let Some(v) = lookup(ENV_DELAY_MAX) {
            self.fetch_delay.max_secs = parse_number(ENV_DELAY_MAX, &v)?;
        }
        Ok(())
    }

    /// Check that everything a full run needs is present.
    ///
    /// Fetch delay bounds are not checked here; bad bounds only disable the delay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_days < 0 {
            return Err(ConfigError::Invalid {
                key: ENV_HISTORY_DAYS,
                value: self.history_days.to_string(),
                reason: "must not be negative".into(),
            });
        }
        if history_start(Local::now().date_naive(), self.history_days).is_none() {
            return Err(ConfigError::Invalid {
                key: ENV_HISTORY_DAYS,
                value: self.history_days.to_string(),
                reason: "window reaches outside the supported date range".into(),
            });
        }
        self.table_ref()?;
        self.credentials_path()?;
        Ok(())
    }

    pub fn table_ref(&self) -> Result<TableRef, ConfigError> {
        fn required(
            value: &Option<String>,
            key: &'static str,
        ) -> Result<String, ConfigError> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(ConfigError::Missing(key))
        }

        Ok(TableRef::new(
            required(&self.warehouse.project_id, ENV_PROJECT_ID)?,
            required(&self.warehouse.dataset_id, ENV_DATASET_ID)?,
            required(&self.warehouse.table_id, ENV_TABLE_ID)?,
        ))
    }

    pub fn credentials_path(&self) -> Result<&Path, ConfigError> {
        self.warehouse
            .credentials_path
            .as_deref()
            .ok_or(ConfigError::Missing(ENV_CREDENTIALS))
    }
}
