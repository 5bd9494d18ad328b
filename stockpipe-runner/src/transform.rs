//! dbt invocation.
//!
//! Both steps run `dbt <command> --profiles-dir . --target-path <target>` from the
//! dbt project directory. A non-zero exit is fatal for the step; the tool's own
//! stderr is relayed, not reinterpreted.

use crate::config::DbtConfig;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::{error, info};

/// How many trailing stderr lines to keep in a failure.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbtStep {
    Run,
    Test,
}

impl DbtStep {
    pub fn command(&self) -> &'static str {
        match self {
            DbtStep::Run => "run",
            DbtStep::Test => "test",
        }
    }
}

impl fmt::Display for DbtStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dbt {}", self.command())
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to start {step}: {reason}")]
    Spawn { step: DbtStep, reason: String },

    #[error("{step} exited with status {code:?}: {stderr_tail}")]
    Failed {
        step: DbtStep,
        code: Option<i32>,
        stderr_tail: String,
    },
}

/// Something that can execute a dbt step.
pub trait StepRunner {
    fn run(&self, step: DbtStep) -> Result<(), TransformError>;
}

/// Runs dbt as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    executable: String,
    project_dir: PathBuf,
    target_path: PathBuf,
}

impl ProcessRunner {
    pub fn new(config: &DbtConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            project_dir: config.project_dir.clone(),
            target_path: config.target_path.clone(),
        }
    }

    /// Arguments passed after the executable.
    pub fn args(&self, step: DbtStep) -> Vec<String> {
        vec![
            step.command().to_string(),
            "--profiles-dir".to_string(),
            ".".to_string(),
            "--target-path".to_string(),
            self.target_path.display().to_string(),
        ]
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

impl StepRunner for ProcessRunner {
    fn run(&self, step: DbtStep) -> Result<(), TransformError> {
        let args = self.args(step);
        info!(
            "Running `{} {}` in {}",
            self.executable,
            args.join(" "),
            self.project_dir.display()
        );

        let output = Command::new(&self.executable)
            .args(&args)
            .current_dir(&self.project_dir)
            .output()
            .map_err(|e| TransformError::Spawn {
                step,
                reason: e.to_string(),
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!("{step}: {line}");
        }

        if output.status.success() {
            info!("{step} finished");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            error!("{step}: {line}");
        }
        Err(TransformError::Failed {
            step,
            code: output.status.code(),
            stderr_tail: tail(&stderr, STDERR_TAIL_LINES),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(executable: &str, project_dir: PathBuf) -> ProcessRunner {
        ProcessRunner::new(&DbtConfig {
            project_dir,
            target_path: PathBuf::from("/tmp/dbt_target"),
            executable: executable.to_string(),
        })
    }

    #[test]
    fn builds_profiles_and_target_arguments() {
        let r = runner("dbt", PathBuf::from("/srv/dbt"));
        assert_eq!(
            r.args(DbtStep::Test),
            vec!["test", "--profiles-dir", ".", "--target-path", "/tmp/dbt_target"]
        );
        assert_eq!(r.args(DbtStep::Run)[0], "run");
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner("stockpipe-no-such-dbt-binary", dir.path().to_path_buf());
        let err = r.run(DbtStep::Run).unwrap_err();
        assert!(matches!(err, TransformError::Spawn { step: DbtStep::Run, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        assert!(runner("true", dir.path().to_path_buf()).run(DbtStep::Run).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_fails_the_step() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner("false", dir.path().to_path_buf())
            .run(DbtStep::Test)
            .unwrap_err();
        assert!(matches!(
            err,
            TransformError::Failed {
                step: DbtStep::Test,
                code: Some(1),
                ..
            }
        ));
    }
}
