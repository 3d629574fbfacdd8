//! Partition analysis: decides whether a task list can be split into
//! independent per-domain work-streams.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use super::classify::classify_path;
use super::{PartitionError, PartitionPlan, Recommendation, Thresholds};
use crate::domain::{Domain, Task, TaskList, TaskSet};

/// Groups tasks by domain and scores the grouping against [`Thresholds`].
///
/// The analyzer is pure: it never touches the filesystem or git.
#[derive(Debug, Clone, Default)]
pub struct PartitionAnalyzer {
    thresholds: Thresholds,
}

impl PartitionAnalyzer {
    /// Creates an analyzer with the given thresholds.
    #[must_use]
    pub const fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Returns the thresholds in use.
    #[must_use]
    pub const fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Turns the planner's task list into tasks, classifying any entry whose
    /// domain is missing and collapsing repeated `(path, domain)` pairs.
    ///
    /// # Errors
    /// Returns `PartitionError::InvalidTask` if an entry has an empty path.
    pub fn tasks_from_list(list: &TaskList) -> Result<Vec<Task>, PartitionError> {
        let mut seen = BTreeSet::new();
        let mut tasks = Vec::with_capacity(list.tasks.len());
        for (index, entry) in list.tasks.iter().enumerate() {
            let domain = entry
                .domain
                .clone()
                .unwrap_or_else(|| classify_path(&entry.path));
            let task = Task::new(&entry.path, domain)
                .map_err(|source| PartitionError::InvalidTask { index, source })?;
            if seen.insert((task.path().to_string(), task.domain().clone())) {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Analyzes a planner task list.
    ///
    /// # Errors
    /// Returns `PartitionError::InvalidTask` if an entry has an empty path.
    pub fn analyze_list(&self, list: &TaskList) -> Result<PartitionPlan, PartitionError> {
        let tasks = Self::tasks_from_list(list)?;
        Ok(self.analyze(&tasks, &list.descriptions))
    }

    /// Analyzes a flat list of tasks.
    ///
    /// A negative verdict is not an error: the plan carries `viable = false`
    /// and a `sequential` recommendation.
    #[must_use]
    pub fn analyze(&self, tasks: &[Task], descriptions: &BTreeMap<Domain, String>) -> PartitionPlan {
        let mut discovery_order: Vec<Domain> = Vec::new();
        let mut files_by_domain: BTreeMap<Domain, Vec<String>> = BTreeMap::new();
        let mut domains_by_file: HashMap<&str, BTreeSet<&Domain>> = HashMap::new();

        for task in tasks {
            let files = files_by_domain.entry(task.domain().clone()).or_insert_with(|| {
                discovery_order.push(task.domain().clone());
                Vec::new()
            });
            if !files.iter().any(|f| f == task.path()) {
                files.push(task.path().to_string());
            }
            domains_by_file
                .entry(task.path())
                .or_default()
                .insert(task.domain());
        }

        let file_count = domains_by_file.len();
        let domain_count = files_by_domain.len();
        let shared = domains_by_file.values().filter(|d| d.len() >= 2).count();
        let overlap_ratio = if file_count == 0 {
            0.0
        } else {
            ratio(shared, file_count)
        };

        let failures = self.failed_clauses(file_count, domain_count, overlap_ratio);
        let viable = failures.is_empty();
        let reason = if viable {
            "viable".to_string()
        } else {
            failures.join("; ")
        };

        let domains = files_by_domain
            .into_iter()
            .map(|(domain, files)| {
                let description = descriptions
                    .get(&domain)
                    .cloned()
                    .unwrap_or_else(|| domain.default_description(files.len()));
                (domain, TaskSet { files, description })
            })
            .collect();

        debug!(
            file_count,
            domain_count, overlap_ratio, viable, "Partition analysis complete"
        );

        PartitionPlan {
            viable,
            reason,
            file_count,
            domain_count,
            overlap_ratio,
            recommendation: if viable {
                Recommendation::Parallel
            } else {
                Recommendation::Sequential
            },
            domains,
            discovery_order,
        }
    }

    fn failed_clauses(&self, file_count: usize, domain_count: usize, overlap: f64) -> Vec<String> {
        let t = &self.thresholds;
        let mut failures = Vec::new();
        if domain_count < t.min_domains {
            failures.push(format!(
                "too few domains ({domain_count} < {})",
                t.min_domains
            ));
        }
        if file_count < t.min_files {
            failures.push(format!("too few files ({file_count} < {})", t.min_files));
        }
        if overlap >= t.max_overlap {
            failures.push(format!(
                "file overlap too high ({overlap:.2} >= {:.2})",
                t.max_overlap
            ));
        }
        failures
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64
}
