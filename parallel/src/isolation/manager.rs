//! Workspace lifecycle management.
//!
//! Each workspace is a git worktree on its own branch under the workspace
//! root. State lives in the metadata store; this type keeps no per-workspace
//! memory of its own.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::WorkspaceError;
use super::naming::{MAX_NAME_ATTEMPTS, branch_name, directory_name, short_hash};
use crate::domain::{Domain, TaskRefId, Workspace, WorkspaceId, WorkspaceStatus};
use crate::infrastructure::audit::{AuditEvent, log_audit};
use crate::infrastructure::config::WorkspaceSettings;
use crate::infrastructure::config::workspace::DEFAULT_WORKSPACE_DIR;
use crate::store::MetadataStore;
use crate::vcs::GitBackend;

/// How long one Active workspace has been running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDuration {
    /// Workspace id.
    pub workspace_id: WorkspaceId,
    /// Domain it serves.
    pub domain: Domain,
    /// Time since it became Active.
    pub active_for: Duration,
}

/// Creates, tracks and removes isolated workspaces.
pub struct WorkspaceManager {
    git: Arc<dyn GitBackend>,
    store: MetadataStore,
    repo_root: PathBuf,
    workspace_root: PathBuf,
    /// Serializes branch creation and deletion.
    branch_lock: Mutex<()>,
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager")
            .field("repo_root", &self.repo_root)
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

impl WorkspaceManager {
    /// Creates a manager for the repository described by `settings`, creating
    /// the workspace root if needed.
    ///
    /// # Errors
    ///
    /// - `WorkspaceError::InvalidPath` if the repository root does not exist
    ///   or the workspace root cannot be created
    /// - `WorkspaceError::UnsafeWorkspaceRoot` if the workspace root is the
    ///   repository root or one of its ancestors
    pub fn new(
        settings: &WorkspaceSettings,
        git: Arc<dyn GitBackend>,
        store: MetadataStore,
    ) -> Result<Self, WorkspaceError> {
        let repo_root = dunce::canonicalize(&settings.repo_root).map_err(|source| {
            WorkspaceError::InvalidPath {
                path: settings.repo_root.clone(),
                source,
            }
        })?;

        // `join` keeps an absolute workspace root as is.
        let configured = repo_root.join(
            settings
                .workspace_root
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_WORKSPACE_DIR)),
        );
        std::fs::create_dir_all(&configured).map_err(|source| WorkspaceError::InvalidPath {
            path: configured.clone(),
            source,
        })?;
        let workspace_root =
            dunce::canonicalize(&configured).map_err(|source| WorkspaceError::InvalidPath {
                path: configured.clone(),
                source,
            })?;
        if repo_root.starts_with(&workspace_root) {
            return Err(WorkspaceError::UnsafeWorkspaceRoot {
                workspace_root,
                repo_root,
            });
        }

        Ok(Self {
            git,
            store,
            repo_root,
            workspace_root,
            branch_lock: Mutex::new(()),
        })
    }

    /// Repository root (canonical).
    #[must_use]
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Workspace root (canonical).
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// The metadata store backing this manager.
    #[must_use]
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// The git backend used by this manager.
    #[must_use]
    pub fn git(&self) -> &Arc<dyn GitBackend> {
        &self.git
    }

    /// Resolves the current head of `base_branch`.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceError::BaseResolution` if git cannot resolve it.
    pub async fn resolve_base(&self, base_branch: &str) -> Result<String, WorkspaceError> {
        self.git
            .resolve_commit(&self.repo_root, base_branch)
            .await
            .map_err(|source| WorkspaceError::BaseResolution {
                base: base_branch.to_string(),
                source,
            })
    }

    /// Creates a workspace forked from the current head of `base_branch`.
    ///
    /// # Errors
    ///
    /// See [`WorkspaceManager::create_from_commit`].
    pub async fn create(
        &self,
        domain: &Domain,
        base_branch: &str,
        task_ref_id: &TaskRefId,
    ) -> Result<Workspace, WorkspaceError> {
        let base_commit = self.resolve_base(base_branch).await?;
        self.create_from_commit(domain, base_branch, &base_commit, task_ref_id)
            .await
    }

    /// Creates a workspace forked from `base_commit`, so that every workspace
    /// of a run shares the same fork point.
    ///
    /// # Errors
    ///
    /// - `WorkspaceError::NameExhausted` if every candidate name is taken
    /// - `WorkspaceError::Creation` if git cannot create the worktree
    /// - `WorkspaceError::MetadataWrite` if the record cannot be written; the
    ///   directory is then left for [`WorkspaceManager::recover_orphans`]
    #[instrument(skip_all, fields(domain = %domain, task_ref_id = %task_ref_id))]
    pub async fn create_from_commit(
        &self,
        domain: &Domain,
        base_branch: &str,
        base_commit: &str,
        task_ref_id: &TaskRefId,
    ) -> Result<Workspace, WorkspaceError> {
        let _guard = self.branch_lock.lock().await;

        let (branch, path) = self.allocate_name(domain, task_ref_id).await?;

        self.git
            .add_worktree(&self.repo_root, &path, &branch, base_commit)
            .await
            .map_err(|source| WorkspaceError::Creation {
                domain: domain.clone(),
                source,
            })?;

        let workspace = Workspace {
            id: WorkspaceId::new(),
            domain: domain.clone(),
            path: path.clone(),
            branch_name: branch.clone(),
            base_branch: base_branch.to_string(),
            base_commit: base_commit.to_string(),
            task_ref_id: task_ref_id.clone(),
            status: WorkspaceStatus::Created,
            created_at: Utc::now(),
            activated_at: None,
            completed_at: None,
            merged_at: None,
            archived_at: None,
            error_message: None,
        };

        if let Err(source) = self.store.insert_workspace(&workspace).await {
            warn!(path = %path.display(), error = %source, "Workspace created without a record");
            return Err(WorkspaceError::MetadataWrite { path, source });
        }

        metrics::counter!("brio_workspaces_created_total").increment(1);
        log_audit(&AuditEvent::WorkspaceCreated {
            workspace_id: workspace.id.to_string(),
            task_ref_id: task_ref_id.to_string(),
            domain: domain.to_string(),
            branch: branch.clone(),
        });
        info!(workspace_id = %workspace.id, branch = %branch, "Workspace created");

        Ok(workspace)
    }

    async fn allocate_name(
        &self,
        domain: &Domain,
        task_ref_id: &TaskRefId,
    ) -> Result<(String, PathBuf), WorkspaceError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            let hash = short_hash(nanos, domain, attempt);
            let branch = branch_name(task_ref_id, domain, &hash);
            let path = self
                .workspace_root
                .join(directory_name(task_ref_id, domain, &hash));

            if path.exists()
                || self.store.branch_in_use(&branch).await?
                || self.git.branch_exists(&self.repo_root, &branch).await?
            {
                debug!(%branch, attempt, "Branch name taken, retrying");
                continue;
            }
            return Ok((branch, path));
        }
        Err(WorkspaceError::NameExhausted {
            domain: domain.clone(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    /// Loads an active workspace.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceError::NotFound` if there is no active record.
    pub async fn get(&self, id: WorkspaceId) -> Result<Workspace, WorkspaceError> {
        self.store
            .get_workspace(id)
            .await?
            .ok_or(WorkspaceError::NotFound(id))
    }

    /// Lists the active workspaces of a run, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn list(&self, task_ref_id: &TaskRefId) -> Result<Vec<Workspace>, WorkspaceError> {
        Ok(self.store.list_workspaces(task_ref_id).await?)
    }

    /// Moves a workspace to `target`, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// - `WorkspaceError::InvalidTransition` if the state machine forbids it
    /// - `WorkspaceError::Store` with `StoreError::StaleStatus` if another
    ///   writer changed the workspace concurrently
    #[instrument(skip(self), fields(workspace_id = %id, to = %target))]
    pub async fn transition(
        &self,
        id: WorkspaceId,
        target: WorkspaceStatus,
    ) -> Result<Workspace, WorkspaceError> {
        self.transition_with(id, target, None).await
    }

    /// Moves a workspace to `Failed`, recording why.
    ///
    /// # Errors
    ///
    /// See [`WorkspaceManager::transition`].
    pub async fn fail(&self, id: WorkspaceId, reason: &str) -> Result<Workspace, WorkspaceError> {
        self.transition_with(id, WorkspaceStatus::Failed, Some(reason))
            .await
    }

    async fn transition_with(
        &self,
        id: WorkspaceId,
        target: WorkspaceStatus,
        error_message: Option<&str>,
    ) -> Result<Workspace, WorkspaceError> {
        let mut workspace = self.get(id).await?;
        let previous = workspace.status;
        workspace.apply_transition(target, Utc::now())?;
        if let Some(message) = error_message {
            workspace.error_message = Some(message.to_string());
        }
        self.store.compare_and_set(&workspace, previous).await?;
        debug!(from = %previous, "Workspace transitioned");
        Ok(workspace)
    }

    /// Removes the worktree of a merged workspace, optionally deletes its
    /// branch, and archives the record.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceError::NotMerged` for any status other than
    /// `Merged`; conflicted workspaces are never cleaned up.
    #[instrument(skip(self), fields(workspace_id = %id))]
    pub async fn cleanup(&self, id: WorkspaceId, delete_branch: bool) -> Result<(), WorkspaceError> {
        let workspace = self.get(id).await?;
        if workspace.status != WorkspaceStatus::Merged {
            return Err(WorkspaceError::NotMerged {
                id,
                status: workspace.status,
            });
        }
        self.remove_and_archive(workspace, delete_branch, false)
            .await
    }

    /// Force-removes the worktree and branch of a workspace that will never
    /// be merged and archives it. Allowed for `Created`, `Completed` and
    /// `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceError::NotDiscardable` for any other status.
    #[instrument(skip(self), fields(workspace_id = %id))]
    pub async fn discard(&self, id: WorkspaceId) -> Result<(), WorkspaceError> {
        let workspace = self.get(id).await?;
        if !matches!(
            workspace.status,
            WorkspaceStatus::Created | WorkspaceStatus::Completed | WorkspaceStatus::Failed
        ) {
            return Err(WorkspaceError::NotDiscardable {
                id,
                status: workspace.status,
            });
        }
        self.remove_and_archive(workspace, true, true).await
    }

    async fn remove_and_archive(
        &self,
        mut workspace: Workspace,
        delete_branch: bool,
        force_branch_delete: bool,
    ) -> Result<(), WorkspaceError> {
        let previous = workspace.status;
        workspace.apply_transition(WorkspaceStatus::Archived, Utc::now())?;

        let _guard = self.branch_lock.lock().await;

        if workspace.path.exists() {
            self.git
                .remove_worktree(&self.repo_root, &workspace.path, true)
                .await?;
        } else {
            self.git.prune_worktrees(&self.repo_root).await?;
        }

        let branch_deleted = if delete_branch
            && self
                .git
                .branch_exists(&self.repo_root, &workspace.branch_name)
                .await?
        {
            self.git
                .delete_branch(&self.repo_root, &workspace.branch_name, force_branch_delete)
                .await?;
            true
        } else {
            false
        };

        self.store.archive(&workspace, previous).await?;

        log_audit(&AuditEvent::WorkspaceArchived {
            workspace_id: workspace.id.to_string(),
            branch: workspace.branch_name.clone(),
            previous_status: previous.to_string(),
            branch_deleted,
        });
        info!(workspace_id = %workspace.id, %previous, branch_deleted, "Workspace archived");
        Ok(())
    }

    /// How long each Active workspace of a run has been Active.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn active_durations(
        &self,
        task_ref_id: &TaskRefId,
    ) -> Result<Vec<ActiveDuration>, WorkspaceError> {
        let now = Utc::now();
        Ok(self
            .list(task_ref_id)
            .await?
            .into_iter()
            .filter_map(|ws| {
                ws.active_for(now).map(|active_for| ActiveDuration {
                    workspace_id: ws.id,
                    domain: ws.domain,
                    active_for,
                })
            })
            .collect())
    }
}
