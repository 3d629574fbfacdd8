//! Core domain types shared by every stage of a parallel run.

mod execution;
mod ids;
mod merge;
mod task;
mod workspace;

pub use execution::{DomainReport, ExecutionResult, ExecutionStatus, ExecutionSummary};
pub use ids::{TaskRefId, WorkspaceId};
pub use merge::{
    ConflictedDomain, MergeConflictReport, MergeInterruption, MergeOutcome, MergeStatus,
    MergeSummary, MergeWarning,
};
pub use task::{Domain, PlannedTask, Task, TaskList, TaskSet};
pub use workspace::{Workspace, WorkspaceStatus};

use thiserror::Error;

/// Errors raised when constructing or mutating domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Task reference ids must not be blank.
    #[error("task reference id must not be empty")]
    EmptyTaskRef,
    /// Task paths must not be blank.
    #[error("task path must not be empty")]
    EmptyPath,
    /// The workspace state machine forbids the requested change.
    #[error("invalid workspace status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Current status.
        from: WorkspaceStatus,
        /// Requested status.
        to: WorkspaceStatus,
    },
    /// A persisted status label is not recognized.
    #[error("unknown workspace status: {0}")]
    UnknownStatus(String),
}

/// Lowercases a label and folds every run of characters outside `[a-z0-9]`
/// into a single `-`, trimming leading and trailing dashes.
#[must_use]
pub fn sanitize_ref_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}
