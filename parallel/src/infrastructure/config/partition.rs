//! Partition analysis thresholds.

use serde::Deserialize;

use crate::partition::{MAX_OVERLAP, MIN_DOMAINS, MIN_FILES, Thresholds};

/// Viability thresholds for the partition analyzer.
#[derive(Debug, Deserialize, Clone)]
pub struct PartitionSettings {
    /// Minimum distinct files (default: 3)
    #[serde(default = "default_min_files")]
    pub min_files: usize,

    /// Minimum distinct domains (default: 2)
    #[serde(default = "default_min_domains")]
    pub min_domains: usize,

    /// Exclusive upper bound on the share of files claimed by two or more
    /// domains (default: 0.20)
    #[serde(default = "default_max_overlap")]
    pub max_overlap: f64,
}

impl Default for PartitionSettings {
    fn default() -> Self {
        Self {
            min_files: default_min_files(),
            min_domains: default_min_domains(),
            max_overlap: default_max_overlap(),
        }
    }
}

impl From<&PartitionSettings> for Thresholds {
    fn from(settings: &PartitionSettings) -> Self {
        Self {
            min_domains: settings.min_domains,
            min_files: settings.min_files,
            max_overlap: settings.max_overlap,
        }
    }
}

fn default_min_files() -> usize {
    MIN_FILES
}

fn default_min_domains() -> usize {
    MIN_DOMAINS
}

fn default_max_overlap() -> f64 {
    MAX_OVERLAP
}
