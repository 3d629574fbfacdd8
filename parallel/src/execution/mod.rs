//! Execution Coordinator: one worker per workspace, run concurrently.

pub mod coordinator;
pub mod worker;

pub use coordinator::ExecutionCoordinator;
pub use worker::{DomainTask, SubprocessWorker, Worker, WorkerError};

use thiserror::Error;

use crate::domain::Domain;
use crate::isolation::WorkspaceError;
use crate::store::StoreError;

/// Errors that abort the execution phase. Worker failures are not errors;
/// they are reported as `failed` results.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A workspace's domain has no task set in the plan.
    #[error("no task set for domain {0}")]
    MissingTaskSet(Domain),
    /// A workspace could not be transitioned.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// The summary could not be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}
