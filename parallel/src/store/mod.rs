//! Metadata store for workspace records and run records.

/// Store implementation with `SQLite` backend.
pub mod sqlite;

pub use sqlite::{MetadataStore, RunKind, RunRecord, StoreError};
