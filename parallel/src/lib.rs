//! Brio Parallel - splits a planned task list into per-domain work-streams,
//! runs each in its own git worktree, and merges the branches back in
//! dependency order.
//!
//! The pieces can be used on their own ([`partition::PartitionAnalyzer`],
//! [`isolation::WorkspaceManager`], [`execution::ExecutionCoordinator`],
//! [`merge::MergeSequencer`]) or wired together by
//! [`orchestrator::Orchestrator`].

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Core domain types: domains, workspaces, results and summaries.
pub mod domain;
/// Worker dispatch and result collection.
pub mod execution;
/// Infrastructure components (config, telemetry, audit).
pub mod infrastructure;
/// Isolated git worktrees and their lifecycle.
pub mod isolation;
/// Ordered merging of workspace branches.
pub mod merge;
/// End-to-end runs.
pub mod orchestrator;
/// Partition feasibility analysis.
pub mod partition;
/// SQLite metadata store.
pub mod store;
/// Git access.
pub mod vcs;
