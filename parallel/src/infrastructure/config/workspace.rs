//! Repository and workspace layout settings.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the repository root that holds workspaces when no
/// explicit workspace root is configured.
pub const DEFAULT_WORKSPACE_DIR: &str = ".brio-parallel";

/// Workspace isolation settings.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceSettings {
    /// Repository whose branches are isolated and merged (default: ".")
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,

    /// Directory that holds one subdirectory per workspace
    /// (default: `<repo_root>/.brio-parallel`)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Integration branch (default: "main")
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Delete merged branches on cleanup (default: true)
    #[serde(default = "default_true")]
    pub delete_branches: bool,

    /// Time budget for a single git command in seconds (default: 60)
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            workspace_root: None,
            base_branch: default_base_branch(),
            delete_branches: default_true(),
            git_timeout_secs: default_git_timeout_secs(),
        }
    }
}

impl WorkspaceSettings {
    /// Settings for a repository, everything else defaulted.
    #[must_use]
    pub fn for_repo(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            ..Self::default()
        }
    }

    /// The configured workspace root (relative paths are taken from the
    /// repository root), or the default one under the repository.
    #[must_use]
    pub fn resolved_workspace_root(&self) -> PathBuf {
        self.repo_root.join(
            self.workspace_root
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_WORKSPACE_DIR)),
        )
    }

    /// Per-command git timeout.
    #[must_use]
    pub const fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_git_timeout_secs() -> u64 {
    60
}
