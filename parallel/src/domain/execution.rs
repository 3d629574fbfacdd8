//! Worker results and their run-level aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Domain, WorkspaceId};

/// Outcome reported by a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Everything requested was done.
    Success,
    /// Some of the work was done; the branch is still mergeable.
    Partial,
    /// The worker failed.
    Failed,
}

impl ExecutionStatus {
    /// Folds per-domain statuses: `failed` if any failed, else `partial` if
    /// any partial, else `success`. An empty set aggregates to `success`.
    #[must_use]
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        statuses.into_iter().fold(Self::Success, |acc, s| match (acc, s) {
            (Self::Failed, _) | (_, Self::Failed) => Self::Failed,
            (Self::Partial, _) | (_, Self::Partial) => Self::Partial,
            _ => Self::Success,
        })
    }
}

/// Result document written by a worker and read once by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Worker outcome.
    pub status: ExecutionStatus,
    /// Files the worker created.
    #[serde(default)]
    pub files_created: Vec<String>,
    /// Files the worker modified.
    #[serde(default)]
    pub files_modified: Vec<String>,
    /// Problems worth surfacing to a human.
    #[serde(default)]
    pub issues: Vec<String>,
}

impl ExecutionResult {
    /// Builds a failed result carrying one issue.
    #[must_use]
    pub fn failed(issue: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            files_created: Vec::new(),
            files_modified: Vec::new(),
            issues: vec![issue.into()],
        }
    }
}

/// Per-domain line of an [`ExecutionSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainReport {
    /// Workspace the worker ran in.
    pub workspace_id: WorkspaceId,
    /// Worker outcome.
    pub status: ExecutionStatus,
    /// Number of files created.
    pub files_created: usize,
    /// Number of files modified.
    pub files_modified: usize,
    /// Issues raised by the worker.
    pub issues: Vec<String>,
    /// Wall-clock time spent in the worker.
    pub duration_ms: u64,
}

/// Aggregated outcome of the execution phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Aggregated status.
    pub status: ExecutionStatus,
    /// One entry per domain.
    pub domains: BTreeMap<Domain, DomainReport>,
    /// When the first worker was dispatched.
    pub started_at: DateTime<Utc>,
    /// When the last result was collected.
    pub finished_at: DateTime<Utc>,
    /// Total wall-clock time of the phase.
    pub duration_ms: u64,
}

impl ExecutionSummary {
    /// Domains whose worker did not report `success`.
    #[must_use]
    pub fn non_successful(&self) -> Vec<Domain> {
        self.domains
            .iter()
            .filter(|(_, report)| report.status != ExecutionStatus::Success)
            .map(|(domain, _)| domain.clone())
            .collect()
    }

    /// Per-domain statuses, as consumed by the merge gate.
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<Domain, ExecutionStatus> {
        self.domains
            .iter()
            .map(|(domain, report)| (domain.clone(), report.status))
            .collect()
    }
}
