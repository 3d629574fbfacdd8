//! Merge ordering settings.

use serde::Deserialize;

use crate::domain::Domain;
use crate::merge::DEFAULT_PRIORITY;

/// Merge sequencer settings.
#[derive(Debug, Deserialize, Clone)]
pub struct MergeSettings {
    /// Domains merged first, in order. Domains not listed are merged after
    /// these, in discovery order.
    #[serde(default = "default_priority")]
    pub priority: Vec<Domain>,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            priority: default_priority(),
        }
    }
}

fn default_priority() -> Vec<Domain> {
    DEFAULT_PRIORITY.to_vec()
}
