//! Configuration management for Brio parallel runs.
//!
//! Settings are layered: built-in defaults, then an optional
//! `brio-parallel.toml`, then environment variables prefixed with `BRIO`
//! (sections separated by `__`, e.g. `BRIO__PARTITION__MAX_OVERLAP=0.3`).
//!
//! # Example
//!
//! ```no_run
//! use brio_parallel::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! ```

pub mod database;
pub mod merge;
pub mod partition;
pub mod retention;
pub mod telemetry;
pub mod workspace;

pub use database::DatabaseSettings;
pub use merge::MergeSettings;
pub use partition::PartitionSettings;
pub use retention::RetentionSettings;
pub use telemetry::TelemetrySettings;
pub use workspace::WorkspaceSettings;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Name (without extension) of the optional configuration file.
pub const CONFIG_FILE: &str = "brio-parallel";

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    /// Metadata database settings.
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Partition analyzer thresholds.
    #[serde(default)]
    pub partition: PartitionSettings,
    /// Repository and workspace layout.
    #[serde(default)]
    pub workspace: WorkspaceSettings,
    /// Merge ordering.
    #[serde(default)]
    pub merge: MergeSettings,
    /// Garbage collection thresholds.
    #[serde(default)]
    pub retention: RetentionSettings,
}

impl Settings {
    /// Creates a new settings instance from the optional config file in the
    /// working directory, environment variables and defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Like [`Settings::new`], reading `file` instead of the default config
    /// file. An explicit file must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::with_name(CONFIG_FILE).required(false),
        };

        let s = Config::builder()
            .set_default("telemetry.service_name", "brio-parallel")?
            .set_default("telemetry.sampling_ratio", 1.0)?
            .add_source(file_source)
            .add_source(Environment::with_prefix("BRIO").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[test]
    fn defaults_fill_every_section() {
        let settings = Settings::default();
        assert_eq!(settings.partition.min_domains, 2);
        assert_eq!(settings.partition.min_files, 3);
        assert!((settings.partition.max_overlap - 0.20).abs() < f64::EPSILON);
        assert_eq!(settings.workspace.base_branch, "main");
        assert_eq!(
            settings.merge.priority,
            vec![
                Domain::Database,
                Domain::Backend,
                Domain::Frontend,
                Domain::Tests,
                Domain::Docs
            ]
        );
        assert_eq!(settings.retention.conflicted_after_days, 14);
        assert!(settings.database.url.is_none());
        assert_eq!(
            settings
                .database
                .url_for(&settings.workspace)
                .expose_secret(),
            "sqlite://./.brio-parallel/metadata.db"
        );
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[partition]
max_overlap = 0.3

[workspace]
repo_root = "/srv/repo"
base_branch = "develop"

[merge]
priority = ["backend", "database", "infra"]
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert!((settings.partition.max_overlap - 0.3).abs() < f64::EPSILON);
        assert_eq!(settings.partition.min_files, 3);
        assert_eq!(settings.workspace.base_branch, "develop");
        assert_eq!(
            settings.workspace.resolved_workspace_root(),
            Path::new("/srv/repo").join(workspace::DEFAULT_WORKSPACE_DIR)
        );
        assert_eq!(
            settings.merge.priority,
            vec![
                Domain::Backend,
                Domain::Database,
                Domain::Custom("infra".into())
            ]
        );
        assert_eq!(
            settings
                .database
                .url_for(&settings.workspace)
                .expose_secret(),
            format!(
                "sqlite://{}",
                Path::new("/srv/repo")
                    .join(workspace::DEFAULT_WORKSPACE_DIR)
                    .join(database::DATABASE_FILE)
                    .display()
            )
        );
        assert_eq!(settings.telemetry.service_name, "brio-parallel");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
