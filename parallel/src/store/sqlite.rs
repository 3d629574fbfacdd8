//! SQLite-backed metadata store.
//!
//! Workspace records live in two partitions: `workspaces` holds every record
//! that has not been archived, `archived_workspaces` holds the rest. Each row
//! carries a few indexed columns plus the full record as JSON. Status changes
//! are compare-and-set updates keyed on the expected current status.

use chrono::{DateTime, SecondsFormat, Utc};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{debug, instrument};

use crate::domain::{TaskRefId, Workspace, WorkspaceId, WorkspaceStatus};

/// Errors that can occur when using the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database-related error.
    #[error("Database Error: {0}")]
    DbError(#[from] sqlx::Error),
    /// A record could not be encoded or decoded.
    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// No active record with that id.
    #[error("workspace {0} not found")]
    NotFound(WorkspaceId),
    /// The record changed since it was read.
    #[error("workspace {id} is {actual}, expected {expected}")]
    StaleStatus {
        /// Workspace id.
        id: WorkspaceId,
        /// Status the caller read.
        expected: WorkspaceStatus,
        /// Status currently stored.
        actual: WorkspaceStatus,
    },
    /// A stored row could not be interpreted.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Kind of a persisted run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// The partition plan.
    Plan,
    /// The execution summary.
    Execution,
    /// A merge summary.
    Merge,
    /// A conflict report awaiting a human.
    ConflictReport,
    /// A run that stopped before merging.
    Aborted,
}

impl RunKind {
    /// Returns the persisted label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Execution => "execution",
            Self::Merge => "merge",
            Self::ConflictReport => "conflict_report",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Self::Plan),
            "execution" => Ok(Self::Execution),
            "merge" => Ok(Self::Merge),
            "conflict_report" => Ok(Self::ConflictReport),
            "aborted" => Ok(Self::Aborted),
            other => Err(StoreError::Corrupt(format!("unknown run kind {other}"))),
        }
    }
}

/// A persisted run-level document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Row id; increases with insertion order.
    pub id: i64,
    /// Run the record belongs to.
    pub task_ref_id: String,
    /// Document kind.
    pub kind: RunKind,
    /// The document itself.
    pub payload: serde_json::Value,
    /// When it was written.
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    /// Decodes the payload into a concrete document type.
    ///
    /// # Errors
    /// Returns `StoreError::Serialization` if the payload has another shape.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS workspaces (
        id TEXT PRIMARY KEY,
        task_ref_id TEXT NOT NULL,
        domain TEXT NOT NULL,
        branch_name TEXT NOT NULL UNIQUE,
        path TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        record TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_workspaces_task_ref ON workspaces (task_ref_id)",
    "CREATE TABLE IF NOT EXISTS archived_workspaces (
        id TEXT PRIMARY KEY,
        task_ref_id TEXT NOT NULL,
        domain TEXT NOT NULL,
        branch_name TEXT NOT NULL,
        path TEXT NOT NULL,
        created_at TEXT NOT NULL,
        archived_at TEXT NOT NULL,
        record TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_archived_task_ref ON archived_workspaces (task_ref_id)",
    "CREATE TABLE IF NOT EXISTS run_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_ref_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_run_records_task_ref ON run_records (task_ref_id, kind)",
];

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_workspace(row: &SqliteRow) -> Result<Workspace, StoreError> {
    let record: String = row.try_get("record")?;
    Ok(serde_json::from_str(&record)?)
}

/// Workspace and run metadata backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Opens (creating if needed) the database at `url` and ensures the schema.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Every connection to `sqlite::memory:` is a separate database, so the
        // pool must hold exactly one connection for its whole life.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and ensures the schema.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Inserts a freshly created workspace.
    ///
    /// # Errors
    /// Returns an error if the insert fails (including a duplicate branch).
    #[instrument(skip(self, workspace), fields(workspace_id = %workspace.id))]
    pub async fn insert_workspace(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let record = serde_json::to_string(workspace)?;
        sqlx::query(
            "INSERT INTO workspaces (id, task_ref_id, domain, branch_name, path, status, created_at, record)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workspace.id.to_string())
        .bind(workspace.task_ref_id.as_str())
        .bind(workspace.domain.name())
        .bind(&workspace.branch_name)
        .bind(workspace.path.display().to_string())
        .bind(workspace.status.as_str())
        .bind(timestamp(workspace.created_at))
        .bind(record)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Loads an active (non-archived) workspace.
    ///
    /// # Errors
    /// Returns an error if the query fails or the record is unreadable.
    pub async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>, StoreError> {
        let row = sqlx::query("SELECT record FROM workspaces WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_workspace).transpose()
    }

    /// Loads an archived workspace.
    ///
    /// # Errors
    /// Returns an error if the query fails or the record is unreadable.
    pub async fn get_archived(&self, id: WorkspaceId) -> Result<Option<Workspace>, StoreError> {
        let row = sqlx::query("SELECT record FROM archived_workspaces WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_workspace).transpose()
    }

    /// Lists the active workspaces of one run, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a record is unreadable.
    pub async fn list_workspaces(&self, task_ref_id: &TaskRefId) -> Result<Vec<Workspace>, StoreError> {
        let rows = sqlx::query(
            "SELECT record FROM workspaces WHERE task_ref_id = ? ORDER BY created_at, id",
        )
        .bind(task_ref_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_workspace).collect()
    }

    /// Lists every active workspace across runs, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails or a record is unreadable.
    pub async fn list_all_workspaces(&self) -> Result<Vec<Workspace>, StoreError> {
        let rows = sqlx::query("SELECT record FROM workspaces ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_workspace).collect()
    }

    /// Lists the archived workspaces of one run.
    ///
    /// # Errors
    /// Returns an error if the query fails or a record is unreadable.
    pub async fn list_archived(&self, task_ref_id: &TaskRefId) -> Result<Vec<Workspace>, StoreError> {
        let rows = sqlx::query(
            "SELECT record FROM archived_workspaces WHERE task_ref_id = ? ORDER BY created_at, id",
        )
        .bind(task_ref_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_workspace).collect()
    }

    /// Checks whether a branch name is used by any record, active or archived.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn branch_in_use(&self, branch_name: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM workspaces WHERE branch_name = ?1)
                 OR EXISTS(SELECT 1 FROM archived_workspaces WHERE branch_name = ?1) AS used",
        )
        .bind(branch_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("used")? != 0)
    }

    /// Persists `workspace` if the stored status still equals `expected`.
    ///
    /// # Errors
    /// Returns `StoreError::StaleStatus` if another writer changed the status
    /// first, or `StoreError::NotFound` if the record is gone.
    #[instrument(skip(self, workspace), fields(workspace_id = %workspace.id, to = %workspace.status))]
    pub async fn compare_and_set(
        &self,
        workspace: &Workspace,
        expected: WorkspaceStatus,
    ) -> Result<(), StoreError> {
        let record = serde_json::to_string(workspace)?;
        let result = sqlx::query(
            "UPDATE workspaces SET status = ?, record = ? WHERE id = ? AND status = ?",
        )
        .bind(workspace.status.as_str())
        .bind(record)
        .bind(workspace.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.explain_miss(workspace.id, expected).await);
        }
        debug!(from = %expected, "Workspace status updated");
        Ok(())
    }

    /// Moves `workspace` (already stamped `Archived`) to the archived
    /// partition, provided the stored status still equals `expected`.
    ///
    /// # Errors
    /// Returns `StoreError::StaleStatus` or `StoreError::NotFound` as for
    /// [`MetadataStore::compare_and_set`].
    #[instrument(skip(self, workspace), fields(workspace_id = %workspace.id))]
    pub async fn archive(
        &self,
        workspace: &Workspace,
        expected: WorkspaceStatus,
    ) -> Result<(), StoreError> {
        let record = serde_json::to_string(workspace)?;
        let archived_at = workspace.archived_at.unwrap_or_else(Utc::now);

        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM workspaces WHERE id = ? AND status = ?")
            .bind(workspace.id.to_string())
            .bind(expected.as_str())
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.explain_miss(workspace.id, expected).await);
        }
        sqlx::query(
            "INSERT INTO archived_workspaces (id, task_ref_id, domain, branch_name, path, created_at, archived_at, record)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workspace.id.to_string())
        .bind(workspace.task_ref_id.as_str())
        .bind(workspace.domain.name())
        .bind(&workspace.branch_name)
        .bind(workspace.path.display().to_string())
        .bind(timestamp(workspace.created_at))
        .bind(timestamp(archived_at))
        .bind(record)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn explain_miss(&self, id: WorkspaceId, expected: WorkspaceStatus) -> StoreError {
        match self.get_workspace(id).await {
            Ok(Some(current)) => StoreError::StaleStatus {
                id,
                expected,
                actual: current.status,
            },
            Ok(None) => StoreError::NotFound(id),
            Err(e) => e,
        }
    }

    /// Appends a run record.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be encoded or the insert fails.
    #[instrument(skip_all, fields(task_ref_id = %task_ref_id, kind = %kind))]
    pub async fn record_run<T: Serialize + Sync>(
        &self,
        task_ref_id: &TaskRefId,
        kind: RunKind,
        payload: &T,
    ) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(payload)?;
        let result = sqlx::query(
            "INSERT INTO run_records (task_ref_id, kind, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(task_ref_id.as_str())
        .bind(kind.as_str())
        .bind(payload)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Lists the run records of one run in insertion order, optionally
    /// filtered by kind.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row is unreadable.
    pub async fn run_records(
        &self,
        task_ref_id: &TaskRefId,
        kind: Option<RunKind>,
    ) -> Result<Vec<RunRecord>, StoreError> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT id, task_ref_id, kind, payload, created_at FROM run_records
                     WHERE task_ref_id = ? AND kind = ? ORDER BY id",
                )
                .bind(task_ref_id.as_str())
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, task_ref_id, kind, payload, created_at FROM run_records
                     WHERE task_ref_id = ? ORDER BY id",
                )
                .bind(task_ref_id.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(decode_run_record).collect()
    }

    /// Returns the most recent run record of a kind.
    ///
    /// # Errors
    /// Returns an error if the query fails or the row is unreadable.
    pub async fn latest_run_record(
        &self,
        task_ref_id: &TaskRefId,
        kind: RunKind,
    ) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.run_records(task_ref_id, Some(kind)).await?.pop())
    }
}

fn decode_run_record(row: &SqliteRow) -> Result<RunRecord, StoreError> {
    let kind: String = row.try_get("kind")?;
    let payload: String = row.try_get("payload")?;
    let created_at: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {created_at}: {e}")))?
        .with_timezone(&Utc);
    Ok(RunRecord {
        id: row.try_get("id")?,
        task_ref_id: row.try_get("task_ref_id")?,
        kind: kind.parse()?,
        payload: serde_json::from_str(&payload)?,
        created_at,
    })
}
