//! Workspace isolation: one git worktree on a dedicated branch per domain.

pub mod manager;
pub mod naming;
pub mod recovery;

pub use manager::{ActiveDuration, WorkspaceManager};
pub use recovery::{GarbageReport, OrphanReport, RetentionPolicy};

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{Domain, ValidationError, WorkspaceId, WorkspaceStatus};
use crate::store::StoreError;
use crate::vcs::GitError;

/// Errors that can occur while managing workspaces.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The repository or workspace root is unusable.
    #[error("Invalid path '{path}': {source}")]
    InvalidPath {
        /// Path that was rejected.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },
    /// The workspace root is the repository root or one of its ancestors, so
    /// orphan recovery would reclaim repository directories.
    #[error("Workspace root {workspace_root} must not contain the repository at {repo_root}")]
    UnsafeWorkspaceRoot {
        /// Rejected workspace root.
        workspace_root: PathBuf,
        /// Repository root.
        repo_root: PathBuf,
    },
    /// The base branch could not be resolved to a commit.
    #[error("Failed to resolve base '{base}': {source}")]
    BaseResolution {
        /// Branch or revision that was resolved.
        base: String,
        /// Source error.
        #[source]
        source: GitError,
    },
    /// No unused branch name was found.
    #[error("No free branch name for {domain} after {attempts} attempts")]
    NameExhausted {
        /// Domain being allocated.
        domain: Domain,
        /// Attempts made.
        attempts: u32,
    },
    /// The worktree could not be created.
    #[error("Failed to create workspace for {domain}: {source}")]
    Creation {
        /// Domain being allocated.
        domain: Domain,
        /// Source error.
        #[source]
        source: GitError,
    },
    /// The worktree exists but its record could not be written. The directory
    /// is left for orphan recovery.
    #[error("Failed to record workspace at {path}: {source}")]
    MetadataWrite {
        /// Orphaned directory.
        path: PathBuf,
        /// Source error.
        #[source]
        source: StoreError,
    },
    /// No active workspace with that id.
    #[error("Workspace not found: {0}")]
    NotFound(WorkspaceId),
    /// The state machine forbids the requested transition.
    #[error(transparent)]
    InvalidTransition(#[from] ValidationError),
    /// Cleanup is only allowed for merged workspaces.
    #[error("Workspace {id} is {status}; only merged workspaces can be cleaned up")]
    NotMerged {
        /// Workspace id.
        id: WorkspaceId,
        /// Current status.
        status: WorkspaceStatus,
    },
    /// Discard refused for this status.
    #[error("Workspace {id} is {status} and cannot be discarded")]
    NotDiscardable {
        /// Workspace id.
        id: WorkspaceId,
        /// Current status.
        status: WorkspaceStatus,
    },
    /// A git operation failed.
    #[error("Git operation failed: {0}")]
    Git(#[from] GitError),
    /// The metadata store failed.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
    /// Failed to read the workspace root.
    #[error("Failed to read directory: {0}")]
    ReadDirectoryFailed(String),
}
