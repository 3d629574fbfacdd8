//! Partition analysis of planner task lists.

mod analyzer;
mod classify;

pub use analyzer::PartitionAnalyzer;
pub use classify::{UNCLASSIFIED, classify_path};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::domain::{Domain, TaskList, TaskSet, ValidationError};

/// Default minimum number of distinct domains.
pub const MIN_DOMAINS: usize = 2;
/// Default minimum number of distinct files.
pub const MIN_FILES: usize = 3;
/// Default exclusive upper bound on the overlap ratio.
pub const MAX_OVERLAP: f64 = 0.20;

/// Errors raised while loading or analyzing a task list.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// The task list file could not be read.
    #[error("failed to read task list {path}: {source}")]
    Read {
        /// File that was read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The task list is not valid JSON of the expected shape.
    #[error("malformed task list: {0}")]
    Malformed(#[from] serde_json::Error),
    /// An entry could not be turned into a task.
    #[error("invalid task at index {index}: {source}")]
    InvalidTask {
        /// Position in the task list.
        index: usize,
        /// Why it was rejected.
        #[source]
        source: ValidationError,
    },
}

/// Viability thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum distinct domains.
    pub min_domains: usize,
    /// Minimum distinct files.
    pub min_files: usize,
    /// The overlap ratio must stay strictly below this.
    pub max_overlap: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_domains: MIN_DOMAINS,
            min_files: MIN_FILES,
            max_overlap: MAX_OVERLAP,
        }
    }
}

/// Execution mode the analyzer recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Run one isolated worker per domain.
    Parallel,
    /// Fall back to a single sequential worker.
    Sequential,
}

/// Immutable result of one partition analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionPlan {
    /// Whether the run may be parallelized.
    pub viable: bool,
    /// `"viable"` or the list of failed clauses.
    pub reason: String,
    /// Distinct files.
    pub file_count: usize,
    /// Distinct domains.
    pub domain_count: usize,
    /// Share of files referenced by two or more domains.
    pub overlap_ratio: f64,
    /// Recommended execution mode.
    pub recommendation: Recommendation,
    /// Files and description per domain.
    pub domains: BTreeMap<Domain, TaskSet>,
    /// Domains in the order they first appeared in the input.
    pub discovery_order: Vec<Domain>,
}

/// Reads and parses a planner task list from disk.
///
/// # Errors
/// Returns `PartitionError::Read` or `PartitionError::Malformed`.
pub fn load_task_list(path: &Path) -> Result<TaskList, PartitionError> {
    let raw = std::fs::read_to_string(path).map_err(|source| PartitionError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}
