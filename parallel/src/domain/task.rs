//! Task domain - file-level tasks and the domains they are grouped into.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ValidationError;

/// Named partition of file-level tasks; the unit of isolation and merge.
///
/// Serialized as its lowercase name so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Domain {
    /// Schemas, migrations, SQL.
    Database,
    /// Services, APIs, models.
    Backend,
    /// Components, pages, client code.
    Frontend,
    /// Test suites.
    Tests,
    /// Documentation.
    Docs,
    /// Any domain the built-in table does not know about. Never holds a
    /// built-in name; build it through [`Domain::parse`].
    Custom(String),
}

impl Domain {
    /// Every built-in domain, in declaration order.
    pub const BUILTIN: [Domain; 5] = [
        Domain::Database,
        Domain::Backend,
        Domain::Frontend,
        Domain::Tests,
        Domain::Docs,
    ];

    /// Parses a domain label. Built-in names match case-insensitively; every
    /// other label becomes [`Domain::Custom`] and reads back unchanged.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        let trimmed = label.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "database" => Self::Database,
            "backend" => Self::Backend,
            "frontend" => Self::Frontend,
            "tests" => Self::Tests,
            "docs" => Self::Docs,
            _ => Self::Custom(trimmed.to_string()),
        }
    }

    /// Returns the canonical label.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Database => "database",
            Self::Backend => "backend",
            Self::Frontend => "frontend",
            Self::Tests => "tests",
            Self::Docs => "docs",
            Self::Custom(name) => name,
        }
    }

    /// Returns a form of the label that is safe inside a git ref or a
    /// directory name.
    #[must_use]
    pub fn slug(&self) -> String {
        let slug = super::sanitize_ref_component(self.name());
        if slug.is_empty() {
            "custom".to_string()
        } else {
            slug
        }
    }

    /// Human-readable summary used when the planner supplies no description.
    #[must_use]
    pub fn default_description(&self, file_count: usize) -> String {
        let base = match self {
            Self::Database => "Database schema and migrations",
            Self::Backend => "Backend API implementation",
            Self::Frontend => "Frontend UI implementation",
            Self::Tests => "Test suite implementation",
            Self::Docs => "Documentation updates",
            Self::Custom(_) => "Additional implementation tasks",
        };
        let plural = if file_count == 1 { "" } else { "s" };
        format!("{base} ({file_count} file{plural})")
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for Domain {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for Domain {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<Domain> for String {
    fn from(value: Domain) -> Self {
        match value {
            Domain::Custom(name) => name,
            other => other.name().to_string(),
        }
    }
}

/// A target file path bound to a domain. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    path: String,
    domain: Domain,
}

impl Task {
    /// Creates a task, normalizing the path (trimmed, no leading `./`).
    ///
    /// # Errors
    /// Returns `ValidationError::EmptyPath` if nothing is left after trimming.
    pub fn new(path: impl AsRef<str>, domain: Domain) -> Result<Self, ValidationError> {
        let trimmed = path.as_ref().trim();
        let normalized = trimmed.strip_prefix("./").unwrap_or(trimmed);
        if normalized.is_empty() {
            return Err(ValidationError::EmptyPath);
        }
        Ok(Self {
            path: normalized.to_string(),
            domain,
        })
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the domain.
    #[must_use]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }
}

/// The files of one domain plus the description handed to its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSet {
    /// Distinct file paths, in discovery order.
    pub files: Vec<String>,
    /// Domain-scoped task description.
    pub description: String,
}

/// One entry of the planner's task list. The domain may be omitted, in which
/// case it is derived from the path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTask {
    /// Target file path.
    pub path: String,
    /// Explicit domain label, if the planner assigned one.
    #[serde(default)]
    pub domain: Option<Domain>,
}

/// Structured task list produced by the external task planner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    /// File-level tasks.
    pub tasks: Vec<PlannedTask>,
    /// Optional per-domain task descriptions.
    #[serde(default)]
    pub descriptions: BTreeMap<Domain, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_builtin_labels_case_insensitive() {
        assert_eq!(Domain::parse("Backend"), Domain::Backend);
        assert_eq!(Domain::parse(" DATABASE "), Domain::Database);
        assert_eq!(Domain::parse("infra"), Domain::Custom("infra".into()));
    }

    #[test]
    fn custom_labels_survive_a_store_round_trip() {
        for label in ["db", "test", "doc", "documentation", "infra"] {
            let domain = Domain::parse(label);
            assert_eq!(domain, Domain::Custom(label.into()));
            let stored = serde_json::to_string(&domain).unwrap();
            assert_eq!(serde_json::from_str::<Domain>(&stored).unwrap(), domain);
        }
    }

    #[test]
    fn domain_serializes_as_map_key() {
        let mut map = BTreeMap::new();
        map.insert(Domain::Frontend, 1);
        map.insert(Domain::Custom("infra".into()), 2);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"frontend":1,"infra":2}"#);

        let back: BTreeMap<Domain, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn task_path_is_normalized() {
        let task = Task::new("  ./src/api/routes.py ", Domain::Backend).unwrap();
        assert_eq!(task.path(), "src/api/routes.py");
        assert!(Task::new("  ", Domain::Backend).is_err());
    }

    #[test]
    fn custom_slug_is_ref_safe() {
        assert_eq!(Domain::Custom("Infra Ops!".into()).slug(), "infra-ops");
        assert_eq!(Domain::Custom("###".into()).slug(), "custom");
    }

    #[test]
    fn default_description_pluralizes() {
        assert_eq!(
            Domain::Backend.default_description(2),
            "Backend API implementation (2 files)"
        );
        assert_eq!(
            Domain::Docs.default_description(1),
            "Documentation updates (1 file)"
        );
    }
}
