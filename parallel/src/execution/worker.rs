//! The worker capability and a subprocess-backed implementation.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::domain::{Domain, ExecutionResult, TaskRefId, Workspace};

/// Work handed to one worker: the files and description of one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainTask {
    /// Run the task belongs to.
    pub task_ref_id: TaskRefId,
    /// Domain being worked on.
    pub domain: Domain,
    /// Files the worker is expected to touch.
    pub files: Vec<String>,
    /// Domain-scoped description.
    pub description: String,
}

/// Errors a worker can report instead of a result.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker process could not be started.
    #[error("failed to start worker {program}: {source}")]
    Spawn {
        /// Program that was started.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The worker process exited unsuccessfully.
    #[error("worker exited with code {code:?}: {stderr}")]
    Exited {
        /// Exit code, if not killed by a signal.
        code: Option<i32>,
        /// Trimmed standard error.
        stderr: String,
    },
    /// The worker's output is not an execution result.
    #[error("worker output is not a valid result: {0}")]
    InvalidOutput(#[from] serde_json::Error),
    /// Any other worker-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Opaque unit of work run inside one workspace.
///
/// Implementations must not touch anything outside `workspace.path`.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Runs the task and reports what was done.
    async fn run(
        &self,
        workspace: &Workspace,
        task: &DomainTask,
    ) -> Result<ExecutionResult, WorkerError>;
}

/// Runs an external program in the workspace directory.
///
/// The task is passed through the environment (`BRIO_DOMAIN`, `BRIO_BRANCH`,
/// `BRIO_TASK_REF`, `BRIO_TASK_DESCRIPTION`, `BRIO_TASK_FILES` newline
/// separated). The program prints one `ExecutionResult` JSON object on stdout;
/// when it also prints other lines, the last non-empty line is used.
#[derive(Debug, Clone)]
pub struct SubprocessWorker {
    program: PathBuf,
    args: Vec<String>,
}

impl SubprocessWorker {
    /// Creates a worker running `program` with `args`.
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

fn parse_result(stdout: &str) -> Result<ExecutionResult, WorkerError> {
    let trimmed = stdout.trim();
    match serde_json::from_str(trimmed) {
        Ok(result) => Ok(result),
        Err(whole) => match trimmed.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(last) if last.trim() != trimmed => Ok(serde_json::from_str(last.trim())?),
            _ => Err(WorkerError::InvalidOutput(whole)),
        },
    }
}

#[async_trait]
impl Worker for SubprocessWorker {
    #[instrument(skip_all, fields(domain = %task.domain, program = %self.program.display()))]
    async fn run(
        &self,
        workspace: &Workspace,
        task: &DomainTask,
    ) -> Result<ExecutionResult, WorkerError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&workspace.path)
            .env("BRIO_DOMAIN", task.domain.name())
            .env("BRIO_BRANCH", &workspace.branch_name)
            .env("BRIO_TASK_REF", task.task_ref_id.as_str())
            .env("BRIO_TASK_DESCRIPTION", &task.description)
            .env("BRIO_TASK_FILES", task.files.join("\n"))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| WorkerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(WorkerError::Exited {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(bytes = output.stdout.len(), "Worker finished");
        parse_result(&stdout)
    }
}
