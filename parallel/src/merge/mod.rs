//! Merge Sequencer: folds the workspace branches of a run back into the
//! integration branch, in dependency order.

mod order;
mod sequencer;

pub use order::merge_order;
pub use sequencer::MergeSequencer;

use thiserror::Error;

use crate::domain::{Domain, TaskRefId};
use crate::isolation::WorkspaceError;
use crate::store::StoreError;
use crate::vcs::GitError;

/// Default merge priority: schema first, documentation last.
pub const DEFAULT_PRIORITY: &[Domain] = &[
    Domain::Database,
    Domain::Backend,
    Domain::Frontend,
    Domain::Tests,
    Domain::Docs,
];

/// Errors that stop the merge phase. Conflicts are not errors; they are
/// reported in the summary.
#[derive(Debug, Error)]
pub enum MergeError {
    /// `resume` found no conflicted workspace.
    #[error("no conflicted workspaces for {0}")]
    NothingToResume(TaskRefId),
    /// Git failed for a reason other than a merge conflict.
    #[error(transparent)]
    Git(#[from] GitError),
    /// A workspace transition failed.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    /// A run record could not be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}
