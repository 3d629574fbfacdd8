//! Merge outcomes, run-level merge summaries and conflict reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Domain, TaskRefId, WorkspaceId};

/// Result of merging one domain branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Domain that was merged.
    pub domain: Domain,
    /// Workspace the branch belongs to.
    pub workspace_id: WorkspaceId,
    /// Merged branch.
    pub branch_name: String,
    /// Whether the merge commit landed.
    pub merged: bool,
    /// Files left unmerged when `merged` is false.
    #[serde(default)]
    pub conflicted_files: Vec<String>,
}

/// Run-level merge status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Every domain merged.
    Success,
    /// At least one domain conflicted.
    Conflicts,
    /// The gate refused to merge anything.
    Blocked,
    /// A git failure other than a conflict stopped the queue; the domains
    /// merged before it stay merged.
    Interrupted,
}

/// A domain left conflicted by the merge loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictedDomain {
    /// Conflicted domain.
    pub domain: Domain,
    /// Workspace holding the branch.
    pub workspace_id: WorkspaceId,
    /// Branch that failed to merge.
    pub branch_name: String,
    /// Unmerged files reported by git.
    pub files: Vec<String>,
}

/// Non-fatal anomalies observed while merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeWarning {
    /// The integration working tree had changes after a clean merge run, so
    /// workspaces were left in place.
    UnexpectedDirtyWorkingTree {
        /// Paths reported by `git status --porcelain`.
        paths: Vec<String>,
    },
    /// Removing a merged workspace failed.
    CleanupFailed {
        /// Domain whose workspace could not be removed.
        domain: Domain,
        /// Error text.
        message: String,
    },
}

/// The domain whose merge failed for a reason other than a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeInterruption {
    /// Domain being merged when the queue stopped.
    pub domain: Domain,
    /// Branch that was being merged.
    pub branch_name: String,
    /// Error text.
    pub message: String,
}

/// Run-level merge result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Run the summary belongs to.
    pub task_ref_id: TaskRefId,
    /// Overall status.
    pub status: MergeStatus,
    /// Order the domains were (or would have been) merged in.
    pub merge_order: Vec<Domain>,
    /// Domains merged by this pass.
    pub merged_domains: Vec<Domain>,
    /// Domains left conflicted.
    pub conflicts: Vec<ConflictedDomain>,
    /// Domains that kept the gate closed.
    pub blocking_domains: Vec<Domain>,
    /// Whether the merged workspaces were removed.
    pub worktrees_cleaned: bool,
    /// Anomalies worth a human look.
    pub warnings: Vec<MergeWarning>,
    /// Set when the status is `Interrupted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruption: Option<MergeInterruption>,
}

impl MergeSummary {
    /// Summary of a pass the gate refused.
    #[must_use]
    pub fn blocked(task_ref_id: TaskRefId, merge_order: Vec<Domain>, blocking: Vec<Domain>) -> Self {
        Self {
            task_ref_id,
            status: MergeStatus::Blocked,
            merge_order,
            merged_domains: Vec::new(),
            conflicts: Vec::new(),
            blocking_domains: blocking,
            worktrees_cleaned: false,
            warnings: Vec::new(),
            interruption: None,
        }
    }
}

/// Persisted hand-off document for a human resolving conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflictReport {
    /// Run the report belongs to.
    pub task_ref_id: TaskRefId,
    /// Branch the domains merge into.
    pub integration_branch: String,
    /// Domains already merged (not rolled back).
    pub merged_domains: Vec<Domain>,
    /// Conflicted domains in merge order.
    pub conflicts: Vec<ConflictedDomain>,
    /// Ordered manual recovery sequence.
    pub recovery_steps: Vec<String>,
    /// When the report was produced.
    pub created_at: DateTime<Utc>,
}

impl MergeConflictReport {
    /// Builds the report and its recovery sequence. `conflicts` must already
    /// be in merge order.
    #[must_use]
    pub fn new(
        task_ref_id: TaskRefId,
        integration_branch: impl Into<String>,
        merged_domains: Vec<Domain>,
        conflicts: Vec<ConflictedDomain>,
    ) -> Self {
        let integration_branch = integration_branch.into();
        let mut recovery_steps = vec![format!("git checkout {integration_branch}")];
        for conflict in &conflicts {
            recovery_steps.push(format!("git merge --no-ff {}", conflict.branch_name));
            recovery_steps.push(format!(
                "resolve {} in: {}",
                conflict.domain,
                conflict.files.join(", ")
            ));
            recovery_steps.push("git add <resolved files> && git commit --no-edit".to_string());
        }
        recovery_steps.push(format!(
            "resume the merge for {task_ref_id} to mark the domains merged and clean up"
        ));

        Self {
            task_ref_id,
            integration_branch,
            merged_domains,
            conflicts,
            recovery_steps,
            created_at: Utc::now(),
        }
    }
}
