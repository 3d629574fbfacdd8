//! End-to-end run: partition, isolate, execute, merge.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::domain::{Domain, ExecutionSummary, MergeSummary, TaskList, TaskRefId, Workspace, WorkspaceId};
use crate::execution::{ExecutionCoordinator, ExecutionError, Worker};
use crate::infrastructure::audit::{AuditEvent, log_audit};
use crate::infrastructure::config::Settings;
use crate::isolation::{WorkspaceError, WorkspaceManager};
use crate::merge::{MergeError, MergeSequencer};
use crate::partition::{PartitionAnalyzer, PartitionError, PartitionPlan, Thresholds};
use crate::store::{RunKind, StoreError};

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The partition is not viable; nothing was created. The caller should
    /// run the task list with a single sequential worker.
    Sequential(PartitionPlan),
    /// Workers ran and the merge phase finished (successfully, with
    /// conflicts, or blocked).
    Completed {
        /// The partition that was executed.
        plan: PartitionPlan,
        /// Worker results.
        execution: ExecutionSummary,
        /// Merge results.
        merge: MergeSummary,
    },
}

/// Payload of an `aborted` run record.
#[derive(Debug, Clone, Serialize)]
struct AbortedRun<'a> {
    reason: String,
    failed_domain: Option<&'a Domain>,
    discarded: Vec<WorkspaceId>,
}

/// Errors that end a run early.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The task list could not be turned into tasks.
    #[error(transparent)]
    Partition(#[from] PartitionError),
    /// The base branch could not be resolved; nothing was created.
    #[error("failed to resolve base branch: {0}")]
    BaseResolution(#[source] WorkspaceError),
    /// A workspace could not be created; the run was rolled back.
    #[error("failed to create workspace for {domain}: {source}")]
    WorkspaceCreation {
        /// Domain whose workspace failed.
        domain: Domain,
        /// Underlying error.
        #[source]
        source: WorkspaceError,
    },
    /// The execution phase failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// The merge phase failed.
    #[error(transparent)]
    Merge(#[from] MergeError),
    /// A run record could not be written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Wires the analyzer, workspace manager, coordinator and sequencer into one
/// run.
#[derive(Debug)]
pub struct Orchestrator {
    manager: Arc<WorkspaceManager>,
    analyzer: PartitionAnalyzer,
    coordinator: ExecutionCoordinator,
    sequencer: MergeSequencer,
    base_branch: String,
}

impl Orchestrator {
    /// Creates an orchestrator.
    pub fn new(
        manager: Arc<WorkspaceManager>,
        worker: Arc<dyn Worker>,
        analyzer: PartitionAnalyzer,
        sequencer: MergeSequencer,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            coordinator: ExecutionCoordinator::new(manager.clone(), worker),
            manager,
            analyzer,
            sequencer,
            base_branch: base_branch.into(),
        }
    }

    /// Creates an orchestrator from configuration.
    pub fn from_settings(
        settings: &Settings,
        manager: Arc<WorkspaceManager>,
        worker: Arc<dyn Worker>,
    ) -> Self {
        let analyzer = PartitionAnalyzer::new(Thresholds::from(&settings.partition));
        let sequencer =
            MergeSequencer::from_settings(manager.clone(), &settings.merge, &settings.workspace);
        Self::new(
            manager,
            worker,
            analyzer,
            sequencer,
            settings.workspace.base_branch.clone(),
        )
    }

    /// The workspace manager used by this orchestrator.
    #[must_use]
    pub fn manager(&self) -> &Arc<WorkspaceManager> {
        &self.manager
    }

    /// The merge sequencer, for resuming conflicted runs.
    #[must_use]
    pub fn sequencer(&self) -> &MergeSequencer {
        &self.sequencer
    }

    /// Analyzes `list` and runs it.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::run_plan`]; additionally `Partition` for an
    /// invalid task list.
    pub async fn run(
        &self,
        task_ref_id: &TaskRefId,
        list: &TaskList,
    ) -> Result<RunOutcome, OrchestratorError> {
        let plan = self.analyzer.analyze_list(list)?;
        self.run_plan(task_ref_id, plan).await
    }

    /// Runs an already analyzed plan.
    ///
    /// A non-viable plan is recorded and returned as `Sequential`. Otherwise
    /// one workspace per domain is created from a single base commit, the
    /// workers run, and the merge phase runs.
    ///
    /// # Errors
    ///
    /// - `WorkspaceCreation` if a workspace cannot be created; every
    ///   workspace created so far is discarded and an `aborted` record written
    /// - `Execution` or `Merge` if a later phase fails; an `aborted` record is
    ///   written and the workspaces are kept for inspection
    /// - `Store` if a run record cannot be written
    #[instrument(skip_all, fields(task_ref_id = %task_ref_id))]
    pub async fn run_plan(
        &self,
        task_ref_id: &TaskRefId,
        plan: PartitionPlan,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.manager
            .store()
            .record_run(task_ref_id, RunKind::Plan, &plan)
            .await?;

        if !plan.viable {
            info!(reason = %plan.reason, "Partition not viable, falling back to sequential");
            return Ok(RunOutcome::Sequential(plan));
        }

        let workspaces = self.create_workspaces(task_ref_id, &plan).await?;
        let execution = match self
            .coordinator
            .execute(task_ref_id, &plan, &workspaces)
            .await
        {
            Ok(execution) => execution,
            Err(e) => {
                error!(error = %e, "Execution phase failed");
                self.abort(task_ref_id, e.to_string(), None, &[]).await?;
                return Err(e.into());
            }
        };
        let merge = match self
            .sequencer
            .merge(task_ref_id, &execution, &plan.discovery_order)
            .await
        {
            Ok(merge) => merge,
            Err(e) => {
                error!(error = %e, "Merge phase failed");
                self.abort(task_ref_id, e.to_string(), None, &[]).await?;
                return Err(e.into());
            }
        };

        info!(execution = ?execution.status, merge = ?merge.status, "Run finished");
        Ok(RunOutcome::Completed {
            plan,
            execution,
            merge,
        })
    }

    async fn create_workspaces(
        &self,
        task_ref_id: &TaskRefId,
        plan: &PartitionPlan,
    ) -> Result<Vec<Workspace>, OrchestratorError> {
        let base_commit = match self.manager.resolve_base(&self.base_branch).await {
            Ok(commit) => commit,
            Err(e) => {
                self.abort(task_ref_id, e.to_string(), None, &[]).await?;
                return Err(OrchestratorError::BaseResolution(e));
            }
        };

        let mut created = Vec::with_capacity(plan.discovery_order.len());
        for domain in &plan.discovery_order {
            match self
                .manager
                .create_from_commit(domain, &self.base_branch, &base_commit, task_ref_id)
                .await
            {
                Ok(ws) => created.push(ws),
                Err(source) => {
                    error!(%domain, error = %source, "Workspace creation failed, rolling back");
                    self.abort(task_ref_id, source.to_string(), Some(domain), &created)
                        .await?;
                    return Err(OrchestratorError::WorkspaceCreation {
                        domain: domain.clone(),
                        source,
                    });
                }
            }
        }
        Ok(created)
    }

    async fn abort(
        &self,
        task_ref_id: &TaskRefId,
        reason: String,
        failed_domain: Option<&Domain>,
        created: &[Workspace],
    ) -> Result<(), OrchestratorError> {
        let mut discarded = Vec::with_capacity(created.len());
        for ws in created {
            match self.manager.discard(ws.id).await {
                Ok(()) => discarded.push(ws.id),
                Err(e) => warn!(workspace_id = %ws.id, error = %e, "Rollback failed"),
            }
        }

        log_audit(&AuditEvent::RunAborted {
            task_ref_id: task_ref_id.to_string(),
            reason: reason.clone(),
        });
        self.manager
            .store()
            .record_run(
                task_ref_id,
                RunKind::Aborted,
                &AbortedRun {
                    reason,
                    failed_domain,
                    discarded,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionResult, ExecutionStatus, MergeStatus};
    use crate::execution::{DomainTask, WorkerError};
    use crate::infrastructure::config::WorkspaceSettings;
    use crate::store::MetadataStore;
    use crate::vcs::mock::MockGit;
    use async_trait::async_trait;

    struct EchoWorker;

    #[async_trait]
    impl Worker for EchoWorker {
        async fn run(
            &self,
            _workspace: &Workspace,
            task: &DomainTask,
        ) -> Result<ExecutionResult, WorkerError> {
            Ok(ExecutionResult {
                status: ExecutionStatus::Success,
                files_created: task.files.clone(),
                files_modified: Vec::new(),
                issues: Vec::new(),
            })
        }
    }

    struct Fixture {
        _repo: tempfile::TempDir,
        git: Arc<MockGit>,
        orchestrator: Orchestrator,
    }

    async fn fixture() -> Fixture {
        let repo = tempfile::tempdir().unwrap();
        let git = Arc::new(MockGit::new());
        let store = MetadataStore::in_memory().await.unwrap();
        let mut settings = Settings::default();
        settings.workspace = WorkspaceSettings::for_repo(repo.path());
        let manager =
            Arc::new(WorkspaceManager::new(&settings.workspace, git.clone(), store).unwrap());
        let orchestrator = Orchestrator::from_settings(&settings, manager, Arc::new(EchoWorker));
        Fixture {
            _repo: repo,
            git,
            orchestrator,
        }
    }

    fn task_ref() -> TaskRefId {
        TaskRefId::new("EPIC-42").unwrap()
    }

    fn list(paths: &[&str]) -> TaskList {
        serde_json::from_value(serde_json::json!({
            "tasks": paths.iter().map(|p| serde_json::json!({"path": p})).collect::<Vec<_>>(),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn single_domain_falls_back_to_sequential() {
        let f = fixture().await;
        let outcome = f
            .orchestrator
            .run(&task_ref(), &list(&["src/api/a.py", "src/api/b.py", "src/api/c.py"]))
            .await
            .unwrap();

        let RunOutcome::Sequential(plan) = outcome else {
            panic!("expected a sequential outcome");
        };
        assert!(!plan.viable);
        assert_eq!(f.git.worktree_count(), 0);

        let store = f.orchestrator.manager().store();
        assert!(
            store
                .latest_run_record(&task_ref(), RunKind::Plan)
                .await
                .unwrap()
                .is_some()
        );
        assert!(store.list_workspaces(&task_ref()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn viable_plan_runs_to_merge() {
        let f = fixture().await;
        let outcome = f
            .orchestrator
            .run(
                &task_ref(),
                &list(&["src/components/a.tsx", "src/api/b.py", "migrations/c.sql"]),
            )
            .await
            .unwrap();

        let RunOutcome::Completed {
            execution, merge, ..
        } = outcome
        else {
            panic!("expected a completed outcome");
        };
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(merge.status, MergeStatus::Success);
        assert_eq!(
            merge.merged_domains,
            vec![Domain::Database, Domain::Backend, Domain::Frontend]
        );
        assert!(merge.worktrees_cleaned);
        assert_eq!(f.git.worktree_count(), 0);
    }

    #[tokio::test]
    async fn creation_failure_rolls_back_the_run() {
        let f = fixture().await;
        f.git.fail_worktree_on("/frontend-");

        let result = f
            .orchestrator
            .run(
                &task_ref(),
                &list(&["migrations/c.sql", "src/api/b.py", "src/components/a.tsx"]),
            )
            .await;

        assert!(matches!(
            result,
            Err(OrchestratorError::WorkspaceCreation {
                domain: Domain::Frontend,
                ..
            })
        ));
        assert_eq!(f.git.worktree_count(), 0);
        assert!(f.git.merge_attempts().is_empty());

        let store = f.orchestrator.manager().store();
        assert!(store.list_workspaces(&task_ref()).await.unwrap().is_empty());
        assert_eq!(store.list_archived(&task_ref()).await.unwrap().len(), 2);

        let aborted = store
            .latest_run_record(&task_ref(), RunKind::Aborted)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(aborted.payload["failed_domain"], "frontend");
        assert_eq!(aborted.payload["discarded"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn merge_failure_is_recorded_as_aborted() {
        let f = fixture().await;
        f.git.fail_merge_on("/backend-");

        let result = f
            .orchestrator
            .run(
                &task_ref(),
                &list(&["src/components/a.tsx", "src/api/b.py", "migrations/c.sql"]),
            )
            .await;
        assert!(matches!(result, Err(OrchestratorError::Merge(MergeError::Git(_)))));

        let store = f.orchestrator.manager().store();
        let aborted = store
            .latest_run_record(&task_ref(), RunKind::Aborted)
            .await
            .unwrap()
            .expect("aborted record persisted");
        assert!(
            aborted.payload["reason"]
                .as_str()
                .unwrap()
                .contains("would be overwritten")
        );
        let merge = store
            .latest_run_record(&task_ref(), RunKind::Merge)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merge.payload["status"], "interrupted");
        // Kept for inspection: the merged database workspace and the rest.
        assert_eq!(store.list_workspaces(&task_ref()).await.unwrap().len(), 3);
    }
}
