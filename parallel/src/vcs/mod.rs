//! Version-control seam.
//!
//! Everything the orchestrator needs from git goes through [`GitBackend`], so
//! the isolation manager and merge sequencer can be driven by an in-memory
//! double in tests and by the `git` binary in production.

mod cli;
#[cfg(test)]
pub(crate) mod mock;

pub use cli::GitCli;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The git process could not be started.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        /// Command line that was attempted.
        command: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The git process exceeded its time budget and was killed.
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout {
        /// Command line that timed out.
        command: String,
        /// Budget that was exceeded.
        timeout: Duration,
    },
    /// Git exited unsuccessfully.
    #[error("`{command}` failed with code {code:?}: {stderr}")]
    CommandFailed {
        /// Command line that failed.
        command: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Trimmed standard error.
        stderr: String,
    },
    /// A path could not be passed to git.
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

/// Result of a `--no-ff` merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    /// The merge commit landed.
    Merged,
    /// The merge stopped on conflicts and was aborted; the files are the ones
    /// git reported as unmerged.
    Conflicted(Vec<String>),
}

/// The git operations the orchestrator relies on.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Resolves a revision to a full commit id.
    async fn resolve_commit(&self, repo: &Path, rev: &str) -> Result<String, GitError>;

    /// Checks whether a local branch exists.
    async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError>;

    /// Creates `branch` at `start_point` and checks it out in a new worktree
    /// at `path`.
    async fn add_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        start_point: &str,
    ) -> Result<(), GitError>;

    /// Removes the worktree at `path`.
    async fn remove_worktree(&self, repo: &Path, path: &Path, force: bool) -> Result<(), GitError>;

    /// Drops administrative entries for worktrees whose directory is gone.
    async fn prune_worktrees(&self, repo: &Path) -> Result<(), GitError>;

    /// Deletes a local branch.
    async fn delete_branch(&self, repo: &Path, branch: &str, force: bool) -> Result<(), GitError>;

    /// Checks out `branch` in the main working tree.
    async fn checkout(&self, repo: &Path, branch: &str) -> Result<(), GitError>;

    /// Merges `branch` into the current branch with `--no-ff`. On conflict the
    /// merge is aborted before returning.
    async fn merge_no_ff(
        &self,
        repo: &Path,
        branch: &str,
        message: &str,
    ) -> Result<MergeAttempt, GitError>;

    /// Paths with uncommitted changes (tracked or untracked) in the main
    /// working tree, relative to the repository root.
    async fn dirty_paths(&self, repo: &Path) -> Result<Vec<String>, GitError>;
}

/// Converts a path into a git argument.
pub(crate) fn path_arg(path: &Path) -> Result<&str, GitError> {
    path.to_str()
        .ok_or_else(|| GitError::NonUtf8Path(path.display().to_string()))
}
