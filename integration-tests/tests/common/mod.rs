//! Shared test utilities for integration tests.
//!
//! Provides a throwaway git repository, an orchestrator wired to it, and a
//! worker that writes and commits files inside its workspace.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use brio_parallel::domain::{
    Domain, ExecutionResult, ExecutionStatus, TaskList, TaskRefId, Workspace,
};
use brio_parallel::execution::{DomainTask, Worker, WorkerError};
use brio_parallel::infrastructure::config::{Settings, WorkspaceSettings};
use brio_parallel::isolation::WorkspaceManager;
use brio_parallel::orchestrator::Orchestrator;
use brio_parallel::store::MetadataStore;
use brio_parallel::vcs::GitCli;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

/// Runs git synchronously and returns trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("failed to run git {args:?}"))?;
    if !output.status.success() {
        bail!(
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// A fresh repository on `main` with one commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Creates the repository.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path();
        git(path, &["init", "--quiet"])?;
        git(path, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        git(path, &["config", "user.name", "Brio Test"])?;
        git(path, &["config", "user.email", "test@brio.build"])?;
        git(path, &["config", "commit.gpgsign", "false"])?;
        std::fs::write(path.join("README.md"), "# fixture\n")?;
        git(path, &["add", "-A"])?;
        git(path, &["commit", "--quiet", "-m", "initial"])?;
        Ok(Self { dir })
    }

    /// Repository root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Head commit of `main`.
    pub fn head(&self) -> Result<String> {
        git(self.path(), &["rev-parse", "main"])
    }

    /// Subjects of merge commits on `main`, oldest first.
    pub fn merge_subjects(&self) -> Result<Vec<String>> {
        let log = git(self.path(), &["log", "--merges", "--reverse", "--format=%s", "main"])?;
        Ok(log.lines().map(str::to_string).collect())
    }

    /// Local branches other than `main`.
    pub fn task_branches(&self) -> Result<Vec<String>> {
        let list = git(self.path(), &["branch", "--format=%(refname:short)"])?;
        Ok(list
            .lines()
            .filter(|b| *b != "main")
            .map(str::to_string)
            .collect())
    }
}

/// Orchestrator plus the repository it works on.
pub struct TestContext {
    /// The repository; dropped last.
    pub repo: TestRepo,
    /// Orchestrator under test.
    pub orchestrator: Orchestrator,
}

impl TestContext {
    /// Wires an orchestrator with real git and an in-memory store.
    pub async fn new(worker: CommittingWorker) -> Result<Self> {
        let repo = TestRepo::new()?;
        let mut settings = Settings::default();
        settings.workspace = WorkspaceSettings::for_repo(repo.path());

        let store = MetadataStore::in_memory().await?;
        let manager = Arc::new(WorkspaceManager::new(
            &settings.workspace,
            Arc::new(GitCli::default()),
            store,
        )?);
        let orchestrator = Orchestrator::from_settings(&settings, manager, Arc::new(worker));
        Ok(Self { repo, orchestrator })
    }

    /// Workspace root used by the orchestrator.
    pub fn workspace_root(&self) -> PathBuf {
        self.orchestrator.manager().workspace_root().to_path_buf()
    }
}

/// Task ref used by every scenario.
pub fn task_ref() -> TaskRefId {
    TaskRefId::new("EPIC-100").expect("valid task ref")
}

/// Task list over `paths`, domains left to classification.
pub fn task_list(paths: &[&str]) -> TaskList {
    serde_json::from_value(serde_json::json!({
        "tasks": paths.iter().map(|p| serde_json::json!({ "path": p })).collect::<Vec<_>>(),
    }))
    .expect("valid task list")
}

/// Task list over `(path, domain label)` pairs.
pub fn labelled_task_list(tasks: &[(&str, &str)]) -> TaskList {
    serde_json::from_value(serde_json::json!({
        "tasks": tasks
            .iter()
            .map(|(path, domain)| serde_json::json!({ "path": path, "domain": domain }))
            .collect::<Vec<_>>(),
    }))
    .expect("valid task list")
}

/// Writes the configured files into its workspace and commits them.
#[derive(Default)]
pub struct CommittingWorker {
    files: HashMap<Domain, Vec<(String, String)>>,
    failing: Vec<Domain>,
}

impl CommittingWorker {
    /// Adds a file the worker for `domain` writes.
    #[must_use]
    pub fn writes(mut self, domain: Domain, path: &str, contents: &str) -> Self {
        self.files
            .entry(domain)
            .or_default()
            .push((path.to_string(), contents.to_string()));
        self
    }

    /// Makes the worker for `domain` report failure without committing.
    #[must_use]
    pub fn fails(mut self, domain: Domain) -> Self {
        self.failing.push(domain);
        self
    }
}

async fn git_in(dir: &Path, args: &[&str]) -> Result<(), WorkerError> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| WorkerError::Other(e.to_string()))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(WorkerError::Exited {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl Worker for CommittingWorker {
    async fn run(
        &self,
        workspace: &Workspace,
        task: &DomainTask,
    ) -> Result<ExecutionResult, WorkerError> {
        if self.failing.contains(&task.domain) {
            return Ok(ExecutionResult {
                status: ExecutionStatus::Failed,
                files_created: Vec::new(),
                files_modified: Vec::new(),
                issues: vec![format!("{} worker gave up", task.domain)],
            });
        }

        let mut created = Vec::new();
        for (path, contents) in self.files.get(&task.domain).into_iter().flatten() {
            let target = workspace.path.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| WorkerError::Other(e.to_string()))?;
            }
            std::fs::write(&target, contents).map_err(|e| WorkerError::Other(e.to_string()))?;
            created.push(path.clone());
        }

        if !created.is_empty() {
            git_in(&workspace.path, &["add", "-A"]).await?;
            let message = format!("{} work", task.domain);
            git_in(&workspace.path, &["commit", "--quiet", "-m", &message]).await?;
        }

        Ok(ExecutionResult {
            status: ExecutionStatus::Success,
            files_created: created,
            files_modified: Vec::new(),
            issues: Vec::new(),
        })
    }
}
