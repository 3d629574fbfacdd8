//! [`GitBackend`] implementation that shells out to the `git` binary.

use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{GitBackend, GitError, MergeAttempt, path_arg};

/// Default time budget for one git invocation.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs git commands as child processes with a per-command timeout.
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(DEFAULT_GIT_TIMEOUT)
    }
}

impl GitCli {
    /// Creates a backend with the given per-command timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Checks whether a `git` binary can be executed.
    pub async fn available() -> bool {
        matches!(
            Command::new("git").arg("--version").output().await,
            Ok(output) if output.status.success()
        )
    }

    async fn run(&self, cwd: &Path, args: &[&str]) -> Result<Output, GitError> {
        let command = format!("git {}", args.join(" "));
        debug!(%command, cwd = %cwd.display(), "Running git");
        let output = timeout(
            self.timeout,
            Command::new("git")
                .args(args)
                .current_dir(cwd)
                .env("GIT_TERMINAL_PROMPT", "0")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| GitError::Timeout {
            command: command.clone(),
            timeout: self.timeout,
        })?
        .map_err(|source| GitError::Spawn { command, source })?;
        Ok(output)
    }

    async fn run_checked(&self, cwd: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(cwd, args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(failure(args, &output))
        }
    }
}

fn failure(args: &[&str], output: &Output) -> GitError {
    GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Extracts the path from one `git status --porcelain` line.
fn porcelain_path(line: &str) -> Option<String> {
    let raw = line.get(3..)?;
    // Renames are reported as `old -> new`.
    let path = raw.rsplit(" -> ").next().unwrap_or(raw);
    let path = path.trim().trim_matches('"');
    (!path.is_empty()).then(|| path.to_string())
}

#[async_trait]
impl GitBackend for GitCli {
    async fn resolve_commit(&self, repo: &Path, rev: &str) -> Result<String, GitError> {
        let spec = format!("{rev}^{{commit}}");
        let stdout = self
            .run_checked(repo, &["rev-parse", "--verify", "--quiet", &spec])
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError> {
        let reference = format!("refs/heads/{branch}");
        let args = ["show-ref", "--verify", "--quiet", reference.as_str()];
        let output = self.run(repo, &args).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failure(&args, &output)),
        }
    }

    async fn add_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        start_point: &str,
    ) -> Result<(), GitError> {
        let path = path_arg(path)?;
        self.run_checked(repo, &["worktree", "add", "-b", branch, path, start_point])
            .await?;
        Ok(())
    }

    async fn remove_worktree(&self, repo: &Path, path: &Path, force: bool) -> Result<(), GitError> {
        let path = path_arg(path)?;
        if force {
            self.run_checked(repo, &["worktree", "remove", "--force", path])
                .await?;
        } else {
            self.run_checked(repo, &["worktree", "remove", path]).await?;
        }
        Ok(())
    }

    async fn prune_worktrees(&self, repo: &Path) -> Result<(), GitError> {
        self.run_checked(repo, &["worktree", "prune"]).await?;
        Ok(())
    }

    async fn delete_branch(&self, repo: &Path, branch: &str, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        self.run_checked(repo, &["branch", flag, branch]).await?;
        Ok(())
    }

    async fn checkout(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        self.run_checked(repo, &["checkout", branch]).await?;
        Ok(())
    }

    async fn merge_no_ff(
        &self,
        repo: &Path,
        branch: &str,
        message: &str,
    ) -> Result<MergeAttempt, GitError> {
        let args = ["merge", "--no-ff", "-m", message, branch];
        let output = self.run(repo, &args).await?;
        if output.status.success() {
            return Ok(MergeAttempt::Merged);
        }

        let unmerged = self
            .run_checked(repo, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        let files: Vec<String> = unmerged
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if let Err(e) = self.run_checked(repo, &["merge", "--abort"]).await {
            // Nothing to abort when the merge never started.
            if !files.is_empty() {
                return Err(e);
            }
            debug!(error = %e, "No merge in progress to abort");
        }

        if files.is_empty() {
            warn!(branch, "Merge failed without unmerged paths");
            return Err(failure(&args, &output));
        }
        Ok(MergeAttempt::Conflicted(files))
    }

    async fn dirty_paths(&self, repo: &Path) -> Result<Vec<String>, GitError> {
        let stdout = self
            .run_checked(repo, &["status", "--porcelain", "--untracked-files=all"])
            .await?;
        Ok(stdout.lines().filter_map(porcelain_path).collect())
    }
}
