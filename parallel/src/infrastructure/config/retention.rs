//! Workspace retention settings used by garbage collection.

use serde::Deserialize;

/// Retention thresholds.
#[derive(Debug, Deserialize, Clone)]
pub struct RetentionSettings {
    /// Created or Active workspaces idle this long are abandoned (default: 24)
    #[serde(default = "default_abandoned_after_hours")]
    pub abandoned_after_hours: u64,

    /// Failed workspaces are discarded after this long (default: 72)
    #[serde(default = "default_failed_after_hours")]
    pub failed_after_hours: u64,

    /// Conflicted workspaces are reported as stale after this long; they are
    /// never removed automatically (default: 14)
    #[serde(default = "default_conflicted_after_days")]
    pub conflicted_after_days: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            abandoned_after_hours: default_abandoned_after_hours(),
            failed_after_hours: default_failed_after_hours(),
            conflicted_after_days: default_conflicted_after_days(),
        }
    }
}

fn default_abandoned_after_hours() -> u64 {
    24
}

fn default_failed_after_hours() -> u64 {
    72
}

fn default_conflicted_after_days() -> u64 {
    14
}
