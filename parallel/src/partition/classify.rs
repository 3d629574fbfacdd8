//! Path-based domain classification for tasks the planner left unlabeled.
//!
//! The rule table is evaluated in order and the first domain with a matching
//! pattern wins. Matching is case-insensitive.

use regex::RegexSet;
use std::sync::LazyLock;

use crate::domain::Domain;

/// Label given to paths no rule matches.
pub const UNCLASSIFIED: &str = "other";

/// Ordered `(domain, patterns)` rule table.
const DOMAIN_RULES: &[(&str, &[&str])] = &[
    (
        "backend",
        &[
            r"^src/backend/",
            r"^src/api/",
            r"^src/services/",
            r"^src/models/",
            r"^backend/",
            r"^api/",
            r"^services/",
            r"^models/",
            r"\.service\.py$",
            r"\.controller\.py$",
            r"\.router\.py$",
        ],
    ),
    (
        "frontend",
        &[
            r"^src/frontend/",
            r"^src/components/",
            r"^src/pages/",
            r"^src/ui/",
            r"^frontend/",
            r"^components/",
            r"^pages/",
            r"^ui/",
            r"\.tsx?$",
            r"\.jsx?$",
            r"\.vue$",
            r"\.svelte$",
        ],
    ),
    (
        "database",
        &[
            r"^migrations/",
            r"^alembic/",
            r"^src/database/",
            r"^src/schemas/",
            r"^database/",
            r"^schemas/",
            r"migration.*\.py$",
            r"\.sql$",
        ],
    ),
    (
        "tests",
        &[
            r"^tests/",
            r"^test/",
            r"test_.*\.py$",
            r".*_test\.py$",
            r"\.test\.ts$",
            r"\.spec\.ts$",
        ],
    ),
    (
        "docs",
        &[
            r"^docs/",
            r"^documentation/",
            r"README.*\.md$",
            r"\.md$",
            r"\.rst$",
        ],
    ),
];

static COMPILED_RULES: LazyLock<Vec<(Domain, RegexSet)>> = LazyLock::new(|| {
    DOMAIN_RULES
        .iter()
        .map(|(label, patterns)| {
            let set = RegexSet::new(patterns.iter().map(|p| format!("(?i){p}")));
            match set {
                Ok(set) => (Domain::parse(label), set),
                Err(e) => panic!("domain rule patterns should be valid at compile time: {e}"),
            }
        })
        .collect()
});

/// Returns the domain of the first rule matching `path`, or
/// `Custom("other")` when nothing matches.
#[must_use]
pub fn classify_path(path: &str) -> Domain {
    let normalized = path.trim().trim_start_matches("./");
    COMPILED_RULES
        .iter()
        .find(|(_, set)| set.is_match(normalized))
        .map_or_else(
            || Domain::Custom(UNCLASSIFIED.to_string()),
            |(domain, _)| domain.clone(),
        )
}
