//! Pipeline orchestration: configuration, the extraction-and-load task, the
//! summary and dbt tasks, and the linear graph plus schedule that ties them.

pub mod config;
pub mod extract;
pub mod pipeline;
pub mod schedule;
pub mod summary;
pub mod transform;

pub use config::{ConfigError, DbtConfig, PipelineConfig};
pub use extract::{
    collect_history, extract_and_load, ExtractError, ExtractProgress, ExtractRequest,
    ExtractResult, LogProgress, SymbolOutcome,
};
pub use pipeline::{Pipeline, PipelineError, PipelineRun, TaskError, TaskId};
pub use schedule::Schedule;
pub use summary::{log_load_results, LoadSummary};
pub use transform::{DbtStep, ProcessRunner, StepRunner, TransformError};
