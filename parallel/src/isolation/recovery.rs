//! Orphan recovery and retention-based garbage collection.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

use super::{WorkspaceError, WorkspaceManager};
use crate::domain::{WorkspaceId, WorkspaceStatus};
use crate::infrastructure::audit::{AuditEvent, log_audit};
use crate::infrastructure::config::RetentionSettings;

/// Age thresholds used by [`WorkspaceManager::collect_garbage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Created or Active workspaces idle this long are abandoned.
    pub abandoned_after: chrono::Duration,
    /// Failed workspaces older than this are discarded.
    pub failed_after: chrono::Duration,
    /// Conflicted workspaces older than this are reported, never removed.
    pub conflicted_after: chrono::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RetentionSettings::default())
    }
}

impl From<&RetentionSettings> for RetentionPolicy {
    fn from(settings: &RetentionSettings) -> Self {
        // Out-of-range values saturate to effectively "never".
        let never = chrono::Duration::weeks(52 * 1000);
        let hours = |h: u64| {
            i64::try_from(h)
                .ok()
                .and_then(chrono::Duration::try_hours)
                .map_or(never, |d| d.min(never))
        };
        let days = |d: u64| {
            i64::try_from(d)
                .ok()
                .and_then(chrono::Duration::try_days)
                .map_or(never, |d| d.min(never))
        };
        Self {
            abandoned_after: hours(settings.abandoned_after_hours),
            failed_after: hours(settings.failed_after_hours),
            conflicted_after: days(settings.conflicted_after_days),
        }
    }
}

/// Result of [`WorkspaceManager::recover_orphans`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    /// Directories under the workspace root without a record, now removed.
    pub reclaimed: Vec<PathBuf>,
    /// Records whose directory no longer exists.
    pub dangling: Vec<WorkspaceId>,
}

/// Result of [`WorkspaceManager::collect_garbage`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GarbageReport {
    /// Created or Active workspaces failed as abandoned and discarded.
    pub abandoned: Vec<WorkspaceId>,
    /// Failed workspaces discarded.
    pub discarded_failed: Vec<WorkspaceId>,
    /// Conflicted workspaces past retention, left in place for a human.
    pub stale_conflicted: Vec<WorkspaceId>,
    /// Per-workspace failures; collection continues past them.
    pub errors: Vec<String>,
}

impl WorkspaceManager {
    /// Reconciles the workspace root with the store.
    ///
    /// Directories without an active record are force-removed (as worktrees
    /// when git knows them, plainly otherwise) and stale worktree entries are
    /// pruned. Records whose directory vanished are reported, not changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace root cannot be read, a directory
    /// cannot be removed, or the store cannot be queried.
    #[instrument(skip(self))]
    pub async fn recover_orphans(&self) -> Result<OrphanReport, WorkspaceError> {
        let records = self.store().list_all_workspaces().await?;
        let tracked: HashSet<PathBuf> = records.iter().map(|ws| ws.path.clone()).collect();

        let mut report = OrphanReport::default();
        let entries = std::fs::read_dir(self.workspace_root())
            .map_err(|e| WorkspaceError::ReadDirectoryFailed(e.to_string()))?;

        for entry in entries {
            let entry = entry.map_err(|e| WorkspaceError::ReadDirectoryFailed(e.to_string()))?;
            let path = entry.path();
            if !path.is_dir() || tracked.contains(&path) {
                continue;
            }

            info!("Cleaning up orphaned workspace directory: {:?}", path);
            if let Err(e) = self
                .git()
                .remove_worktree(self.repo_root(), &path, true)
                .await
            {
                warn!(error = %e, "Not a registered worktree, removing directory");
            }
            if path.exists() {
                std::fs::remove_dir_all(&path).map_err(|source| WorkspaceError::InvalidPath {
                    path: path.clone(),
                    source,
                })?;
            }
            log_audit(&AuditEvent::OrphanReclaimed {
                path: path.display().to_string(),
            });
            report.reclaimed.push(path);
        }

        self.git().prune_worktrees(self.repo_root()).await?;

        for ws in &records {
            if !ws.path.exists() {
                warn!(workspace_id = %ws.id, path = %ws.path.display(), "Workspace directory missing");
                report.dangling.push(ws.id);
            }
        }

        if !report.reclaimed.is_empty() {
            info!("Reclaimed {} orphaned workspace directories", report.reclaimed.len());
        }
        Ok(report)
    }

    /// Applies `policy` to every active workspace as of `now`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be listed; failures on
    /// individual workspaces are collected in the report.
    #[instrument(skip(self, policy))]
    pub async fn collect_garbage(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<GarbageReport, WorkspaceError> {
        let mut report = GarbageReport::default();

        for ws in self.store().list_all_workspaces().await? {
            let idle = now - ws.last_activity();
            let outcome = match ws.status {
                WorkspaceStatus::Created | WorkspaceStatus::Active
                    if idle >= policy.abandoned_after =>
                {
                    let result = match self.fail(ws.id, "abandoned").await {
                        Ok(_) => self.discard(ws.id).await,
                        Err(e) => Err(e),
                    };
                    result.map(|()| report.abandoned.push(ws.id))
                }
                WorkspaceStatus::Failed if idle >= policy.failed_after => self
                    .discard(ws.id)
                    .await
                    .map(|()| report.discarded_failed.push(ws.id)),
                WorkspaceStatus::Conflicted if idle >= policy.conflicted_after => {
                    warn!(workspace_id = %ws.id, branch = %ws.branch_name, "Conflicted workspace awaiting resolution");
                    report.stale_conflicted.push(ws.id);
                    Ok(())
                }
                _ => Ok(()),
            };

            if let Err(e) = outcome {
                warn!(workspace_id = %ws.id, error = %e, "Garbage collection failed for workspace");
                report.errors.push(format!("{}: {e}", ws.id));
            }
        }

        Ok(report)
    }
}
