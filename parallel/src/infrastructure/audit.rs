use serde::Serialize;
use tracing::{info, info_span};

/// Lifecycle event for audit logging.
/// Structured for JSON serialization to enable machine-readable audit trails.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A process started.
    SystemStartup {
        /// Component that started.
        component: String,
    },
    /// A workspace directory and branch were created.
    WorkspaceCreated {
        /// Workspace id.
        workspace_id: String,
        /// Run the workspace belongs to.
        task_ref_id: String,
        /// Domain it serves.
        domain: String,
        /// Dedicated branch.
        branch: String,
    },
    /// A workspace was removed and its record archived.
    WorkspaceArchived {
        /// Workspace id.
        workspace_id: String,
        /// Dedicated branch.
        branch: String,
        /// Status before archiving.
        previous_status: String,
        /// Whether the branch was deleted.
        branch_deleted: bool,
    },
    /// A directory without a record was removed from the workspace root.
    OrphanReclaimed {
        /// Removed directory.
        path: String,
    },
    /// A run stopped before merging.
    RunAborted {
        /// Run id.
        task_ref_id: String,
        /// Why it stopped.
        reason: String,
    },
    /// A merge left domains conflicted.
    MergeConflictRecorded {
        /// Run id.
        task_ref_id: String,
        /// Conflicted domains.
        domains: Vec<String>,
    },
}

/// Logs an audit event to the dedicated audit channel as structured JSON.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a secure file.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Workspace Audit Event");
}
