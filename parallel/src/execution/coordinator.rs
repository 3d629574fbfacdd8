//! Fork-join dispatch of one worker per workspace.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::ExecutionError;
use super::worker::{DomainTask, Worker};
use crate::domain::{
    DomainReport, ExecutionResult, ExecutionStatus, ExecutionSummary, TaskRefId, Workspace,
    WorkspaceStatus,
};
use crate::isolation::{WorkspaceError, WorkspaceManager};
use crate::partition::PartitionPlan;
use crate::store::RunKind;

/// Runs the workers of a run and collects their results.
pub struct ExecutionCoordinator {
    manager: Arc<WorkspaceManager>,
    worker: Arc<dyn Worker>,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl ExecutionCoordinator {
    /// Creates a coordinator dispatching `worker` into workspaces owned by
    /// `manager`.
    pub fn new(manager: Arc<WorkspaceManager>, worker: Arc<dyn Worker>) -> Self {
        Self { manager, worker }
    }

    /// Runs one worker per workspace concurrently and waits for all of them.
    ///
    /// Every workspace is made `Active` and every worker spawned before any
    /// result is awaited. A worker error or panic is recorded as a `failed`
    /// result and never stops its siblings. Every worker is joined before any
    /// result moves its workspace to `Completed` (success, partial) or
    /// `Failed`; a transition that fails at that point turns the domain into
    /// a `failed` result. The summary is always persisted as an `execution`
    /// run record.
    ///
    /// # Errors
    ///
    /// - `ExecutionError::MissingTaskSet` if a workspace has no domain in `plan`
    /// - `ExecutionError::Workspace` if a workspace cannot be activated; the
    ///   workspaces activated before it are failed and no worker is dispatched
    /// - `ExecutionError::Store` if the summary cannot be persisted
    #[instrument(skip_all, fields(task_ref_id = %task_ref_id, workers = workspaces.len()))]
    pub async fn execute(
        &self,
        task_ref_id: &TaskRefId,
        plan: &PartitionPlan,
        workspaces: &[Workspace],
    ) -> Result<ExecutionSummary, ExecutionError> {
        let mut tasks = Vec::with_capacity(workspaces.len());
        for ws in workspaces {
            let set = plan
                .domains
                .get(&ws.domain)
                .ok_or_else(|| ExecutionError::MissingTaskSet(ws.domain.clone()))?;
            tasks.push(DomainTask {
                task_ref_id: task_ref_id.clone(),
                domain: ws.domain.clone(),
                files: set.files.clone(),
                description: set.description.clone(),
            });
        }

        let mut active = Vec::with_capacity(workspaces.len());
        for ws in workspaces {
            match self.manager.transition(ws.id, WorkspaceStatus::Active).await {
                Ok(ws) => active.push(ws),
                Err(e) => {
                    error!(domain = %ws.domain, error = %e, "Activation failed, nothing dispatched");
                    let reason = format!("activation of {} failed: {e}", ws.domain);
                    for activated in &active {
                        if let Err(fail_err) = self.manager.fail(activated.id, &reason).await {
                            warn!(domain = %activated.domain, error = %fail_err, "Could not fail activated workspace");
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        let started_at = Utc::now();
        let phase_start = Instant::now();

        let mut handles = Vec::with_capacity(active.len());
        for (ws, task) in active.iter().cloned().zip(tasks) {
            let worker = Arc::clone(&self.worker);
            handles.push(tokio::spawn(async move {
                let start = Instant::now();
                let result = worker.run(&ws, &task).await;
                (result, start.elapsed())
            }));
        }
        info!("Dispatched {} workers", handles.len());

        // Join every worker before touching any workspace state.
        let mut finished = Vec::with_capacity(handles.len());
        for (ws, handle) in active.iter().zip(handles) {
            let (result, elapsed) = match handle.await {
                Ok((Ok(result), elapsed)) => (result, elapsed),
                Ok((Err(e), elapsed)) => {
                    warn!(domain = %ws.domain, error = %e, "Worker returned an error");
                    (ExecutionResult::failed(format!("worker error: {e}")), elapsed)
                }
                Err(e) => {
                    error!(domain = %ws.domain, error = %e, "Worker task join error");
                    (
                        ExecutionResult::failed(format!("worker panicked: {e}")),
                        phase_start.elapsed(),
                    )
                }
            };
            finished.push((ws, result, elapsed));
        }

        let mut domains = BTreeMap::new();
        for (ws, mut result, elapsed) in finished {
            if let Err(e) = self.settle(ws, &result).await {
                error!(domain = %ws.domain, error = %e, "Workspace transition failed");
                let issue = format!("workspace transition failed: {e}");
                if result.status != ExecutionStatus::Failed {
                    // Only succeeds if the workspace is still Active.
                    if let Err(fail_err) = self.manager.fail(ws.id, &issue).await {
                        debug!(domain = %ws.domain, error = %fail_err, "Workspace left as is");
                    }
                }
                result.status = ExecutionStatus::Failed;
                result.issues.push(issue);
            }

            domains.insert(
                ws.domain.clone(),
                DomainReport {
                    workspace_id: ws.id,
                    status: result.status,
                    files_created: result.files_created.len(),
                    files_modified: result.files_modified.len(),
                    issues: result.issues,
                    duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                },
            );
        }

        let summary = ExecutionSummary {
            status: ExecutionStatus::aggregate(domains.values().map(|r| r.status)),
            domains,
            started_at,
            finished_at: Utc::now(),
            duration_ms: u64::try_from(phase_start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        self.manager
            .store()
            .record_run(task_ref_id, RunKind::Execution, &summary)
            .await?;

        info!(status = ?summary.status, duration_ms = summary.duration_ms, "Execution finished");
        Ok(summary)
    }

    /// Moves a workspace to the status matching its worker result.
    async fn settle(
        &self,
        ws: &Workspace,
        result: &ExecutionResult,
    ) -> Result<Workspace, WorkspaceError> {
        match result.status {
            ExecutionStatus::Failed => {
                let reason = if result.issues.is_empty() {
                    "worker reported failure".to_string()
                } else {
                    result.issues.join("; ")
                };
                self.manager.fail(ws.id, &reason).await
            }
            ExecutionStatus::Success | ExecutionStatus::Partial => {
                self.manager
                    .transition(ws.id, WorkspaceStatus::Completed)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Domain, TaskList};
    use crate::execution::worker::WorkerError;
    use crate::infrastructure::config::WorkspaceSettings;
    use crate::partition::PartitionAnalyzer;
    use crate::store::MetadataStore;
    use crate::vcs::mock::MockGit;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Barrier;

    /// Returns a canned outcome per domain.
    #[derive(Default)]
    struct ScriptedWorker {
        outcomes: HashMap<Domain, ExecutionStatus>,
        errors: HashMap<Domain, String>,
        panics: Vec<Domain>,
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        async fn run(
            &self,
            _workspace: &Workspace,
            task: &DomainTask,
        ) -> Result<ExecutionResult, WorkerError> {
            if self.panics.contains(&task.domain) {
                panic!("worker for {} blew up", task.domain);
            }
            if let Some(message) = self.errors.get(&task.domain) {
                return Err(WorkerError::Other(message.clone()));
            }
            let status = self
                .outcomes
                .get(&task.domain)
                .copied()
                .unwrap_or(ExecutionStatus::Success);
            Ok(ExecutionResult {
                status,
                files_created: task.files.clone(),
                files_modified: Vec::new(),
                issues: match status {
                    ExecutionStatus::Failed => vec!["tests did not pass".into()],
                    _ => Vec::new(),
                },
            })
        }
    }

    /// Only finishes once every worker has started.
    struct RendezvousWorker {
        barrier: Barrier,
    }

    #[async_trait]
    impl Worker for RendezvousWorker {
        async fn run(
            &self,
            _workspace: &Workspace,
            _task: &DomainTask,
        ) -> Result<ExecutionResult, WorkerError> {
            self.barrier.wait().await;
            Ok(ExecutionResult {
                status: ExecutionStatus::Success,
                files_created: Vec::new(),
                files_modified: Vec::new(),
                issues: Vec::new(),
            })
        }
    }

    /// Fails the Database workspace behind the coordinator's back, the way a
    /// concurrent garbage collection pass would.
    struct InterferingWorker {
        manager: Arc<WorkspaceManager>,
    }

    #[async_trait]
    impl Worker for InterferingWorker {
        async fn run(
            &self,
            workspace: &Workspace,
            _task: &DomainTask,
        ) -> Result<ExecutionResult, WorkerError> {
            if workspace.domain == Domain::Database {
                self.manager
                    .fail(workspace.id, "abandoned")
                    .await
                    .map_err(|e| WorkerError::Other(e.to_string()))?;
            } else {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(ExecutionResult {
                status: ExecutionStatus::Success,
                files_created: Vec::new(),
                files_modified: Vec::new(),
                issues: Vec::new(),
            })
        }
    }

    struct Fixture {
        _repo: tempfile::TempDir,
        manager: Arc<WorkspaceManager>,
        plan: PartitionPlan,
        workspaces: Vec<Workspace>,
    }

    fn task_ref() -> TaskRefId {
        TaskRefId::new("EPIC-7").unwrap()
    }

    async fn fixture() -> Fixture {
        let repo = tempfile::tempdir().unwrap();
        let store = MetadataStore::in_memory().await.unwrap();
        let manager = Arc::new(
            WorkspaceManager::new(
                &WorkspaceSettings::for_repo(repo.path()),
                Arc::new(MockGit::new()),
                store,
            )
            .unwrap(),
        );

        let list: TaskList = serde_json::from_value(serde_json::json!({
            "tasks": [
                {"path": "migrations/001_init.sql"},
                {"path": "src/api/users.py"},
                {"path": "src/components/Users.tsx"},
                {"path": "src/api/orders.py"},
            ]
        }))
        .unwrap();
        let plan = PartitionAnalyzer::default().analyze_list(&list).unwrap();

        let mut workspaces = Vec::new();
        for domain in &plan.discovery_order {
            workspaces.push(manager.create(domain, "main", &task_ref()).await.unwrap());
        }

        Fixture {
            _repo: repo,
            manager,
            plan,
            workspaces,
        }
    }

    #[tokio::test]
    async fn all_success_completes_every_workspace() {
        let f = fixture().await;
        let coordinator =
            ExecutionCoordinator::new(f.manager.clone(), Arc::new(ScriptedWorker::default()));

        let summary = coordinator
            .execute(&task_ref(), &f.plan, &f.workspaces)
            .await
            .unwrap();

        assert_eq!(summary.status, ExecutionStatus::Success);
        assert_eq!(summary.domains.len(), 3);
        assert_eq!(summary.domains[&Domain::Backend].files_created, 2);
        for ws in &f.workspaces {
            let stored = f.manager.get(ws.id).await.unwrap();
            assert_eq!(stored.status, WorkspaceStatus::Completed);
            assert!(stored.activated_at.is_some());
            assert!(stored.completed_at.is_some());
        }

        let record = f
            .manager
            .store()
            .latest_run_record(&task_ref(), RunKind::Execution)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.decode::<ExecutionSummary>().unwrap(), summary);
    }

    #[tokio::test]
    async fn failure_does_not_stop_siblings() {
        let f = fixture().await;
        let worker = ScriptedWorker {
            outcomes: HashMap::from([
                (Domain::Backend, ExecutionStatus::Failed),
                (Domain::Frontend, ExecutionStatus::Partial),
            ]),
            ..ScriptedWorker::default()
        };
        let coordinator = ExecutionCoordinator::new(f.manager.clone(), Arc::new(worker));

        let summary = coordinator
            .execute(&task_ref(), &f.plan, &f.workspaces)
            .await
            .unwrap();

        assert_eq!(summary.status, ExecutionStatus::Failed);
        assert_eq!(summary.non_successful(), vec![Domain::Backend, Domain::Frontend]);

        for ws in &f.workspaces {
            let stored = f.manager.get(ws.id).await.unwrap();
            match ws.domain {
                Domain::Backend => {
                    assert_eq!(stored.status, WorkspaceStatus::Failed);
                    assert_eq!(stored.error_message.as_deref(), Some("tests did not pass"));
                }
                _ => assert_eq!(stored.status, WorkspaceStatus::Completed),
            }
        }
    }

    #[tokio::test]
    async fn errors_and_panics_become_failed_results() {
        let f = fixture().await;
        let worker = ScriptedWorker {
            errors: HashMap::from([(Domain::Database, "connection refused".to_string())]),
            panics: vec![Domain::Frontend],
            ..ScriptedWorker::default()
        };
        let coordinator = ExecutionCoordinator::new(f.manager.clone(), Arc::new(worker));

        let summary = coordinator
            .execute(&task_ref(), &f.plan, &f.workspaces)
            .await
            .unwrap();

        let database = &summary.domains[&Domain::Database];
        assert_eq!(database.status, ExecutionStatus::Failed);
        assert_eq!(database.issues, vec!["worker error: connection refused".to_string()]);

        let frontend = &summary.domains[&Domain::Frontend];
        assert_eq!(frontend.status, ExecutionStatus::Failed);
        assert!(frontend.issues[0].starts_with("worker panicked"));

        assert_eq!(
            summary.domains[&Domain::Backend].status,
            ExecutionStatus::Success
        );
    }

    #[tokio::test]
    async fn workers_run_concurrently() {
        let f = fixture().await;
        let worker = RendezvousWorker {
            barrier: Barrier::new(f.workspaces.len()),
        };
        let coordinator = ExecutionCoordinator::new(f.manager.clone(), Arc::new(worker));

        // Sequential dispatch would never get past the barrier.
        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            coordinator.execute(&task_ref(), &f.plan, &f.workspaces),
        )
        .await
        .expect("workers were not run concurrently")
        .unwrap();
        assert_eq!(summary.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn domain_missing_from_plan_is_rejected_before_dispatch() {
        let f = fixture().await;
        let mut plan = f.plan.clone();
        plan.domains.remove(&Domain::Frontend);
        let coordinator =
            ExecutionCoordinator::new(f.manager.clone(), Arc::new(ScriptedWorker::default()));

        let result = coordinator.execute(&task_ref(), &plan, &f.workspaces).await;
        assert!(matches!(
            result,
            Err(ExecutionError::MissingTaskSet(Domain::Frontend))
        ));
        for ws in &f.workspaces {
            assert_eq!(
                f.manager.get(ws.id).await.unwrap().status,
                WorkspaceStatus::Created
            );
        }
    }

    #[tokio::test]
    async fn transition_failure_is_reported_after_every_worker_joined() {
        let f = fixture().await;
        let worker = InterferingWorker {
            manager: f.manager.clone(),
        };
        let coordinator = ExecutionCoordinator::new(f.manager.clone(), Arc::new(worker));

        let summary = coordinator
            .execute(&task_ref(), &f.plan, &f.workspaces)
            .await
            .unwrap();

        assert_eq!(summary.status, ExecutionStatus::Failed);
        let database = &summary.domains[&Domain::Database];
        assert_eq!(database.status, ExecutionStatus::Failed);
        assert!(database.issues[0].starts_with("workspace transition failed"));

        for ws in &f.workspaces {
            let stored = f.manager.get(ws.id).await.unwrap();
            match ws.domain {
                Domain::Database => assert_eq!(stored.status, WorkspaceStatus::Failed),
                _ => {
                    assert_eq!(stored.status, WorkspaceStatus::Completed);
                    assert_eq!(summary.domains[&ws.domain].status, ExecutionStatus::Success);
                }
            }
        }

        let record = f
            .manager
            .store()
            .latest_run_record(&task_ref(), RunKind::Execution)
            .await
            .unwrap()
            .expect("execution record persisted");
        assert_eq!(record.decode::<ExecutionSummary>().unwrap(), summary);
    }

    #[tokio::test]
    async fn activation_failure_fails_the_activated_workspaces() {
        let f = fixture().await;
        // The second workspace was already failed, so it cannot be activated.
        f.manager.fail(f.workspaces[1].id, "abandoned").await.unwrap();
        let coordinator =
            ExecutionCoordinator::new(f.manager.clone(), Arc::new(ScriptedWorker::default()));

        let result = coordinator.execute(&task_ref(), &f.plan, &f.workspaces).await;
        assert!(matches!(result, Err(ExecutionError::Workspace(_))));

        let first = f.manager.get(f.workspaces[0].id).await.unwrap();
        assert_eq!(first.status, WorkspaceStatus::Failed);
        assert!(
            first
                .error_message
                .unwrap()
                .starts_with(&format!("activation of {} failed", f.workspaces[1].domain))
        );
        assert_eq!(
            f.manager.get(f.workspaces[2].id).await.unwrap().status,
            WorkspaceStatus::Created
        );
    }
}
