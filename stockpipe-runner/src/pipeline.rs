//! The fixed linear task graph.
//!
//! `start → extract_and_load → log_results → run_transformations → test_models → end`
//!
//! Each task starts only after its predecessor succeeded. There are no retries:
//! the first failure stops the run at that node, and the next scheduled (or
//! manual) trigger starts again from `start`.

use crate::extract::{
    extract_and_load, ExtractError, ExtractProgress, ExtractRequest, ExtractResult,
};
use crate::summary::{log_load_results, LoadSummary};
use crate::transform::{DbtStep, StepRunner, TransformError};
use std::fmt;
use stockpipe_core::data::HistorySource;
use stockpipe_core::warehouse::WarehouseSink;
use thiserror::Error;
use tracing::{error, info};

/// Nodes of the pipeline graph, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    Start,
    ExtractAndLoad,
    LogResults,
    RunTransformations,
    TestModels,
    End,
}

impl TaskId {
    pub const ORDER: [TaskId; 6] = [
        TaskId::Start,
        TaskId::ExtractAndLoad,
        TaskId::LogResults,
        TaskId::RunTransformations,
        TaskId::TestModels,
        TaskId::End,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TaskId::Start => "start_pipeline",
            TaskId::ExtractAndLoad => "extract_and_load_to_bigquery",
            TaskId::LogResults => "log_load_results",
            TaskId::RunTransformations => "run_dbt_transformations",
            TaskId::TestModels => "test_dbt_models",
            TaskId::End => "end_pipeline",
        }
    }

    /// The single downstream task, `None` for `End`.
    pub fn next(&self) -> Option<TaskId> {
        let i = Self::ORDER.iter().position(|t| t == self)?;
        Self::ORDER.get(i + 1).copied()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("task {task} failed: {source}")]
    TaskFailed {
        task: TaskId,
        /// Tasks that finished before the failure, in order.
        completed: Vec<TaskId>,
        #[source]
        source: TaskError,
    },
}

impl PipelineError {
    pub fn task(&self) -> TaskId {
        match self {
            PipelineError::TaskFailed { task, .. } => *task,
        }
    }

    pub fn completed(&self) -> &[TaskId] {
        match self {
            PipelineError::TaskFailed { completed, .. } => completed,
        }
    }
}

/// Record of a run that reached `End`.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub completed: Vec<TaskId>,
    pub result: ExtractResult,
    pub summary: LoadSummary,
}

/// One wiring of the graph to its collaborators.
pub struct Pipeline<'a> {
    pub source: &'a dyn HistorySource,
    pub sink: &'a dyn WarehouseSink,
    pub steps: &'a dyn StepRunner,
    pub progress: &'a dyn ExtractProgress,
    pub request: ExtractRequest,
}

/// Run one node, recording it in `completed` on success.
fn run_task<T>(
    task: TaskId,
    completed: &mut Vec<TaskId>,
    body: impl FnOnce() -> Result<T, TaskError>,
) -> Result<T, PipelineError> {
    info!(task = task.name(), "Starting task");
    match body() {
        Ok(value) => {
            info!(task = task.name(), "Task succeeded");
            completed.push(task);
            Ok(value)
        }
        Err(source) => {
            error!(task = task.name(), "Task failed: {source}");
            Err(PipelineError::TaskFailed {
                task,
                completed: completed.clone(),
                source,
            })
        }
    }
}

impl<'a> Pipeline<'a> {
    /// Execute every task in order, stopping at the first failure.
    ///
    /// The extraction result is handed straight to the summary task.
    pub fn run(&self) -> Result<PipelineRun, PipelineError> {
        let mut completed = Vec::with_capacity(TaskId::ORDER.len());

        run_task(TaskId::Start, &mut completed, || Ok(()))?;
        let result = run_task(TaskId::ExtractAndLoad, &mut completed, || {
            extract_and_load(self.source, self.sink, &self.request, self.progress)
                .map_err(TaskError::from)
        })?;
        let summary = run_task(TaskId::LogResults, &mut completed, || {
            Ok(log_load_results(&result))
        })?;
        run_task(TaskId::RunTransformations, &mut completed, || {
            self.steps.run(DbtStep::Run).map_err(TaskError::from)
        })?;
        run_task(TaskId::TestModels, &mut completed, || {
            self.steps.run(DbtStep::Test).map_err(TaskError::from)
        })?;
        run_task(TaskId::End, &mut completed, || Ok(()))?;

        Ok(PipelineRun {
            completed,
            result,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_linear() {
        let mut task = TaskId::Start;
        let mut walked = vec![task];
        while let Some(next) = task.next() {
            walked.push(next);
            task = next;
        }
        assert_eq!(walked, TaskId::ORDER.to_vec());
        assert_eq!(TaskId::End.next(), None);
    }

    #[test]
    fn task_names_match_scheduler_ids() {
        let names: Vec<&str> = TaskId::ORDER.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "start_pipeline",
                "extract_and_load_to_bigquery",
                "log_load_results",
                "run_dbt_transformations",
                "test_dbt_models",
                "end_pipeline"
            ]
        );
    }
}
