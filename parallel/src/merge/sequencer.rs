//! Ordered `--no-ff` merging of a run's workspace branches, with conflict
//! isolation, conflict reports and post-merge cleanup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::{MergeError, merge_order};
use crate::domain::{
    ConflictedDomain, Domain, ExecutionStatus, ExecutionSummary, MergeConflictReport,
    MergeInterruption, MergeOutcome, MergeStatus, MergeSummary, MergeWarning, TaskRefId,
    Workspace, WorkspaceStatus,
};
use crate::infrastructure::audit::{AuditEvent, log_audit};
use crate::infrastructure::config::{MergeSettings, WorkspaceSettings};
use crate::isolation::WorkspaceManager;
use crate::store::RunKind;
use crate::vcs::MergeAttempt;

/// Merges the branches of a run into their integration branch, one at a time.
pub struct MergeSequencer {
    manager: Arc<WorkspaceManager>,
    priority: Vec<Domain>,
    delete_branches: bool,
}

impl std::fmt::Debug for MergeSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeSequencer")
            .field("priority", &self.priority)
            .field("delete_branches", &self.delete_branches)
            .finish_non_exhaustive()
    }
}

impl MergeSequencer {
    /// Creates a sequencer merging in `priority` order.
    pub fn new(manager: Arc<WorkspaceManager>, priority: Vec<Domain>, delete_branches: bool) -> Self {
        Self {
            manager,
            priority,
            delete_branches,
        }
    }

    /// Creates a sequencer from configuration.
    pub fn from_settings(
        manager: Arc<WorkspaceManager>,
        merge: &MergeSettings,
        workspace: &WorkspaceSettings,
    ) -> Self {
        Self::new(manager, merge.priority.clone(), workspace.delete_branches)
    }

    /// Merges every workspace of a run.
    ///
    /// Nothing is merged unless every domain reported `success` and every
    /// workspace is `Completed`; otherwise the summary is `blocked`. A
    /// conflicting domain is aborted, marked `Conflicted` and skipped, and the
    /// rest of the queue still runs. Merged domains are never rolled back.
    ///
    /// # Errors
    ///
    /// Returns an error on git failures other than conflicts, on failed
    /// transitions, or when a run record cannot be written. A failure inside
    /// the queue is first persisted as an `interrupted` merge record naming
    /// the domain and the domains already merged.
    #[instrument(skip_all, fields(task_ref_id = %task_ref_id))]
    pub async fn merge(
        &self,
        task_ref_id: &TaskRefId,
        execution: &ExecutionSummary,
        discovery_order: &[Domain],
    ) -> Result<MergeSummary, MergeError> {
        let workspaces = self.manager.list(task_ref_id).await?;
        // Newest record wins if a task ref was reused.
        let by_domain: HashMap<&Domain, &Workspace> =
            workspaces.iter().map(|ws| (&ws.domain, ws)).collect();

        let mut discovered: Vec<Domain> = discovery_order
            .iter()
            .filter(|d| execution.domains.contains_key(*d))
            .cloned()
            .collect();
        for domain in execution.domains.keys() {
            if !discovered.contains(domain) {
                discovered.push(domain.clone());
            }
        }
        let order = merge_order(&self.priority, &discovered);

        let blocking: Vec<Domain> = order
            .iter()
            .filter(|domain| {
                let succeeded = execution.domains.get(*domain).map(|r| r.status)
                    == Some(ExecutionStatus::Success);
                let completed = by_domain.get(*domain).map(|ws| ws.status)
                    == Some(WorkspaceStatus::Completed);
                !(succeeded && completed)
            })
            .cloned()
            .collect();

        if !blocking.is_empty() {
            warn!(?blocking, "Merge blocked");
            let summary = MergeSummary::blocked(task_ref_id.clone(), order, blocking);
            self.manager
                .store()
                .record_run(task_ref_id, RunKind::Merge, &summary)
                .await?;
            return Ok(summary);
        }

        let queue: Vec<Workspace> = order
            .iter()
            .filter_map(|d| by_domain.get(d).map(|ws| (*ws).clone()))
            .collect();
        info!(order = ?order, "Merging {} domains", queue.len());
        self.run_queue(task_ref_id, order, queue, Vec::new()).await
    }

    /// Retries the `Conflicted` workspaces of a run after a human resolved
    /// them, then finishes the run once nothing is left conflicted.
    ///
    /// # Errors
    ///
    /// Returns `MergeError::NothingToResume` if the run has no conflicted
    /// workspace, otherwise the same errors as [`MergeSequencer::merge`].
    #[instrument(skip_all, fields(task_ref_id = %task_ref_id))]
    pub async fn resume(&self, task_ref_id: &TaskRefId) -> Result<MergeSummary, MergeError> {
        let workspaces = self.manager.list(task_ref_id).await?;
        let discovered: Vec<Domain> = workspaces.iter().map(|ws| ws.domain.clone()).collect();
        let order = merge_order(&self.priority, &discovered);

        let queue: Vec<Workspace> = order
            .iter()
            .filter_map(|d| {
                workspaces
                    .iter()
                    .find(|ws| &ws.domain == d && ws.status == WorkspaceStatus::Conflicted)
                    .cloned()
            })
            .collect();
        if queue.is_empty() {
            return Err(MergeError::NothingToResume(task_ref_id.clone()));
        }

        let already_merged = workspaces
            .iter()
            .filter(|ws| ws.status == WorkspaceStatus::Merged)
            .map(|ws| ws.domain.clone())
            .collect();
        info!("Resuming {} conflicted domains", queue.len());
        self.run_queue(task_ref_id, order, queue, already_merged)
            .await
    }

    async fn run_queue(
        &self,
        task_ref_id: &TaskRefId,
        order: Vec<Domain>,
        queue: Vec<Workspace>,
        mut merged_domains: Vec<Domain>,
    ) -> Result<MergeSummary, MergeError> {
        let mut conflicts = Vec::new();
        let integration_branch = queue.first().map(|ws| ws.base_branch.clone());

        if let Some(ref branch) = integration_branch {
            self.manager
                .git()
                .checkout(self.manager.repo_root(), branch)
                .await?;
        }

        let mut failure = None;
        for ws in &queue {
            match self.merge_one(task_ref_id, ws).await {
                Ok(outcome) if outcome.merged => merged_domains.push(outcome.domain),
                Ok(outcome) => conflicts.push(ConflictedDomain {
                    domain: outcome.domain,
                    workspace_id: outcome.workspace_id,
                    branch_name: outcome.branch_name,
                    files: outcome.conflicted_files,
                }),
                Err(e) => {
                    error!(domain = %ws.domain, error = %e, "Merge queue interrupted");
                    failure = Some((ws, e));
                    break;
                }
            }
        }
        merged_domains.sort_by_key(|d| order.iter().position(|o| o == d));

        let mut summary = MergeSummary {
            task_ref_id: task_ref_id.clone(),
            status: MergeStatus::Success,
            merge_order: order,
            merged_domains,
            conflicts,
            blocking_domains: Vec::new(),
            worktrees_cleaned: false,
            warnings: Vec::new(),
            interruption: None,
        };

        if let Some((ws, e)) = failure {
            summary.status = MergeStatus::Interrupted;
            summary.interruption = Some(MergeInterruption {
                domain: ws.domain.clone(),
                branch_name: ws.branch_name.clone(),
                message: e.to_string(),
            });
            self.manager
                .store()
                .record_run(task_ref_id, RunKind::Merge, &summary)
                .await?;
            return Err(e);
        }

        if summary.conflicts.is_empty() {
            self.finish_clean(&mut summary).await?;
        } else {
            summary.status = MergeStatus::Conflicts;
            let report = MergeConflictReport::new(
                task_ref_id.clone(),
                integration_branch.unwrap_or_default(),
                summary.merged_domains.clone(),
                summary.conflicts.clone(),
            );
            self.manager
                .store()
                .record_run(task_ref_id, RunKind::ConflictReport, &report)
                .await?;
            log_audit(&AuditEvent::MergeConflictRecorded {
                task_ref_id: task_ref_id.to_string(),
                domains: summary
                    .conflicts
                    .iter()
                    .map(|c| c.domain.to_string())
                    .collect(),
            });
        }

        self.manager
            .store()
            .record_run(task_ref_id, RunKind::Merge, &summary)
            .await?;
        info!(
            status = ?summary.status,
            merged = summary.merged_domains.len(),
            conflicts = summary.conflicts.len(),
            "Merge finished"
        );
        Ok(summary)
    }

    async fn merge_one(
        &self,
        task_ref_id: &TaskRefId,
        ws: &Workspace,
    ) -> Result<MergeOutcome, MergeError> {
        let message = format!("Merge {} work for {task_ref_id}", ws.domain);
        let attempt = self
            .manager
            .git()
            .merge_no_ff(self.manager.repo_root(), &ws.branch_name, &message)
            .await?;

        let (merged, conflicted_files) = match attempt {
            MergeAttempt::Merged => {
                self.manager
                    .transition(ws.id, WorkspaceStatus::Merged)
                    .await?;
                info!(domain = %ws.domain, branch = %ws.branch_name, "Domain merged");
                (true, Vec::new())
            }
            MergeAttempt::Conflicted(files) => {
                if ws.status != WorkspaceStatus::Conflicted {
                    self.manager
                        .transition(ws.id, WorkspaceStatus::Conflicted)
                        .await?;
                }
                metrics::counter!("brio_merge_conflicts_total").increment(1);
                warn!(domain = %ws.domain, ?files, "Merge conflict, aborted");
                (false, files)
            }
        };

        Ok(MergeOutcome {
            domain: ws.domain.clone(),
            workspace_id: ws.id,
            branch_name: ws.branch_name.clone(),
            merged,
            conflicted_files,
        })
    }

    /// Checks the integration tree and removes the merged workspaces.
    async fn finish_clean(&self, summary: &mut MergeSummary) -> Result<(), MergeError> {
        let dirty = self.unexpected_dirty_paths().await?;
        if !dirty.is_empty() {
            warn!(?dirty, "Integration working tree is dirty, skipping cleanup");
            summary
                .warnings
                .push(MergeWarning::UnexpectedDirtyWorkingTree { paths: dirty });
            return Ok(());
        }

        let mut all_cleaned = true;
        for ws in self.manager.list(&summary.task_ref_id).await? {
            if ws.status != WorkspaceStatus::Merged {
                continue;
            }
            if let Err(e) = self.manager.cleanup(ws.id, self.delete_branches).await {
                warn!(domain = %ws.domain, error = %e, "Cleanup failed");
                all_cleaned = false;
                summary.warnings.push(MergeWarning::CleanupFailed {
                    domain: ws.domain,
                    message: e.to_string(),
                });
            }
        }
        summary.worktrees_cleaned = all_cleaned;
        Ok(())
    }

    /// Dirty paths of the integration tree, ignoring the workspace root.
    async fn unexpected_dirty_paths(&self) -> Result<Vec<String>, MergeError> {
        let paths = self
            .manager
            .git()
            .dirty_paths(self.manager.repo_root())
            .await?;
        let ignored = self
            .manager
            .workspace_root()
            .strip_prefix(self.manager.repo_root())
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty());

        Ok(paths
            .into_iter()
            .filter(|p| ignored.is_none_or(|rel| !Path::new(p).starts_with(rel)))
            .collect())
    }
}
