//! Workspace domain - isolated working directories and their lifecycle.

use chrono::{DateTime, Utc};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::{Domain, TaskRefId, ValidationError, WorkspaceId};

/// Workspace lifecycle status.
///
/// `Created → Active → {Completed | Failed} → {Merged | Conflicted} → Archived`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    /// Directory and branch exist, no worker dispatched yet.
    Created,
    /// A worker is running inside the workspace.
    Active,
    /// The worker reported success or partial success.
    Completed,
    /// The worker reported failure (or never produced a result).
    Failed,
    /// The branch was merged into the integration branch.
    Merged,
    /// The merge conflicted; waiting for a human.
    Conflicted,
    /// Directory removed, record moved to the archive.
    Archived,
}

impl WorkspaceStatus {
    /// Returns the persisted label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Merged => "merged",
            Self::Conflicted => "conflicted",
            Self::Archived => "archived",
        }
    }

    /// Checks whether the worker phase is over for this workspace.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Created | Self::Active)
    }

    /// Validates that a transition from this status to the target is allowed.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidStatusTransition` if the transition is invalid.
    pub fn validate_transition(&self, target: Self) -> Result<(), ValidationError> {
        let valid = matches!(
            (self, target),
            (Self::Created, Self::Active | Self::Failed | Self::Archived)
                | (Self::Active, Self::Completed | Self::Failed)
                | (
                    Self::Completed,
                    Self::Merged | Self::Conflicted | Self::Archived
                )
                // A human resolved the conflict.
                | (Self::Conflicted, Self::Merged)
                | (Self::Failed | Self::Merged, Self::Archived)
        );

        if valid {
            Ok(())
        } else {
            Err(ValidationError::InvalidStatusTransition {
                from: *self,
                to: target,
            })
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for WorkspaceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "merged" => Ok(Self::Merged),
            "conflicted" => Ok(Self::Conflicted),
            "archived" => Ok(Self::Archived),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// An isolated working directory bound to a dedicated branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique id.
    pub id: WorkspaceId,
    /// Domain whose tasks run here.
    pub domain: Domain,
    /// Working directory (a git worktree).
    pub path: PathBuf,
    /// Dedicated branch checked out in `path`.
    pub branch_name: String,
    /// Branch the run integrates into.
    pub base_branch: String,
    /// Commit every workspace of the run forks from.
    pub base_commit: String,
    /// External task this run belongs to.
    pub task_ref_id: TaskRefId,
    /// Lifecycle status.
    pub status: WorkspaceStatus,
    /// When the directory and branch were created.
    pub created_at: DateTime<Utc>,
    /// When a worker was dispatched.
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    /// When the worker reported a terminal result.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the branch was merged.
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    /// When the record was archived.
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    /// Failure or abandonment reason.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Workspace {
    /// Applies a validated status change and stamps the matching timestamp.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidStatusTransition` if the state machine
    /// forbids the change. The workspace is left untouched in that case.
    pub fn apply_transition(
        &mut self,
        target: WorkspaceStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        self.status.validate_transition(target)?;
        match target {
            WorkspaceStatus::Active => self.activated_at = Some(now),
            WorkspaceStatus::Completed | WorkspaceStatus::Failed => {
                self.completed_at = Some(now);
            }
            WorkspaceStatus::Merged => self.merged_at = Some(now),
            WorkspaceStatus::Archived => self.archived_at = Some(now),
            WorkspaceStatus::Created | WorkspaceStatus::Conflicted => {}
        }
        self.status = target;
        Ok(())
    }

    /// How long the workspace has been `Active`, if it is.
    ///
    /// Callers use this to implement their own timeout or abandon policy.
    #[must_use]
    pub fn active_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.status != WorkspaceStatus::Active {
            return None;
        }
        let since = self.activated_at?;
        (now - since).to_std().ok()
    }

    /// Timestamp of the most recent lifecycle event.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        [
            self.archived_at,
            self.merged_at,
            self.completed_at,
            self.activated_at,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(self.created_at)
    }
}
