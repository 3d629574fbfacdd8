//! In-memory [`GitBackend`] used by unit tests.
//!
//! Worktrees are real directories so directory scans behave as in production;
//! branches, merges and conflicts are bookkeeping only.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::{GitBackend, GitError, MergeAttempt};

pub(crate) const MOCK_COMMIT: &str = "0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f";

#[derive(Debug, Default)]
struct State {
    branches: BTreeSet<String>,
    worktrees: BTreeSet<PathBuf>,
    /// `(branch substring, conflicted files)`
    conflicts: Vec<(String, Vec<String>)>,
    /// Branch substrings whose worktree creation fails.
    failing_worktrees: Vec<String>,
    /// Branch substrings whose merge fails outright.
    failing_merges: Vec<String>,
    /// `(branch substring, remaining)`: names reported as taken by other
    /// branches.
    taken_names: Vec<(String, usize)>,
    merge_attempts: Vec<String>,
    merged: Vec<String>,
    dirty: Vec<String>,
    checkouts: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct MockGit {
    state: Mutex<State>,
}

impl MockGit {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Merges of any branch containing `pattern` conflict on `files`.
    pub(crate) fn conflict_on(&self, pattern: &str, files: &[&str]) {
        self.state.lock().conflicts.push((
            pattern.to_string(),
            files.iter().map(|f| (*f).to_string()).collect(),
        ));
    }

    /// Simulates a human resolving the conflict.
    pub(crate) fn resolve_conflicts(&self, pattern: &str) {
        self.state.lock().conflicts.retain(|(p, _)| p != pattern);
    }

    pub(crate) fn fail_worktree_on(&self, pattern: &str) {
        self.state.lock().failing_worktrees.push(pattern.to_string());
    }

    /// Merges of any branch containing `pattern` fail with a git error.
    pub(crate) fn fail_merge_on(&self, pattern: &str) {
        self.state.lock().failing_merges.push(pattern.to_string());
    }

    /// The next `count` branch names containing `pattern` that are checked
    /// already exist in the repository.
    pub(crate) fn take_branch_names(&self, pattern: &str, count: usize) {
        self.state.lock().taken_names.push((pattern.to_string(), count));
    }

    pub(crate) fn set_dirty(&self, paths: &[&str]) {
        self.state.lock().dirty = paths.iter().map(|p| (*p).to_string()).collect();
    }

    pub(crate) fn has_branch(&self, branch: &str) -> bool {
        self.state.lock().branches.contains(branch)
    }

    pub(crate) fn merge_attempts(&self) -> Vec<String> {
        self.state.lock().merge_attempts.clone()
    }

    pub(crate) fn merged(&self) -> Vec<String> {
        self.state.lock().merged.clone()
    }

    pub(crate) fn worktree_count(&self) -> usize {
        self.state.lock().worktrees.len()
    }

    pub(crate) fn checkouts(&self) -> Vec<String> {
        self.state.lock().checkouts.clone()
    }
}

fn failed(command: &str, stderr: &str) -> GitError {
    GitError::CommandFailed {
        command: command.to_string(),
        code: Some(128),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl GitBackend for MockGit {
    async fn resolve_commit(&self, _repo: &Path, _rev: &str) -> Result<String, GitError> {
        Ok(MOCK_COMMIT.to_string())
    }

    async fn branch_exists(&self, _repo: &Path, branch: &str) -> Result<bool, GitError> {
        let mut state = self.state.lock();
        if let Some((_, remaining)) = state
            .taken_names
            .iter_mut()
            .find(|(pattern, remaining)| *remaining > 0 && branch.contains(pattern.as_str()))
        {
            *remaining -= 1;
            state.branches.insert(branch.to_string());
            return Ok(true);
        }
        Ok(state.branches.contains(branch))
    }

    async fn add_worktree(
        &self,
        _repo: &Path,
        path: &Path,
        branch: &str,
        _start_point: &str,
    ) -> Result<(), GitError> {
        let mut state = self.state.lock();
        if state.failing_worktrees.iter().any(|p| branch.contains(p.as_str())) {
            return Err(failed("git worktree add", "simulated failure"));
        }
        if state.branches.contains(branch) {
            return Err(failed("git worktree add", "branch already exists"));
        }
        std::fs::create_dir_all(path).map_err(|source| GitError::Spawn {
            command: "git worktree add".into(),
            source,
        })?;
        state.branches.insert(branch.to_string());
        state.worktrees.insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_worktree(&self, _repo: &Path, path: &Path, _force: bool) -> Result<(), GitError> {
        let mut state = self.state.lock();
        if path.exists() {
            std::fs::remove_dir_all(path).map_err(|source| GitError::Spawn {
                command: "git worktree remove".into(),
                source,
            })?;
        } else if !state.worktrees.contains(path) {
            return Err(failed("git worktree remove", "not a working tree"));
        }
        state.worktrees.remove(path);
        Ok(())
    }

    async fn prune_worktrees(&self, _repo: &Path) -> Result<(), GitError> {
        self.state.lock().worktrees.retain(|p| p.exists());
        Ok(())
    }

    async fn delete_branch(&self, _repo: &Path, branch: &str, _force: bool) -> Result<(), GitError> {
        if self.state.lock().branches.remove(branch) {
            Ok(())
        } else {
            Err(failed("git branch -D", "branch not found"))
        }
    }

    async fn checkout(&self, _repo: &Path, branch: &str) -> Result<(), GitError> {
        self.state.lock().checkouts.push(branch.to_string());
        Ok(())
    }

    async fn merge_no_ff(
        &self,
        _repo: &Path,
        branch: &str,
        _message: &str,
    ) -> Result<MergeAttempt, GitError> {
        let mut state = self.state.lock();
        state.merge_attempts.push(branch.to_string());
        if state.failing_merges.iter().any(|p| branch.contains(p.as_str())) {
            return Err(failed(
                "git merge --no-ff",
                "untracked working tree files would be overwritten by merge",
            ));
        }
        let conflict = state
            .conflicts
            .iter()
            .find(|(pattern, _)| branch.contains(pattern.as_str()))
            .map(|(_, files)| files.clone());
        match conflict {
            Some(files) => Ok(MergeAttempt::Conflicted(files)),
            None => {
                state.merged.push(branch.to_string());
                Ok(MergeAttempt::Merged)
            }
        }
    }

    async fn dirty_paths(&self, _repo: &Path) -> Result<Vec<String>, GitError> {
        Ok(self.state.lock().dirty.clone())
    }
}
