//! Metadata database configuration.

use secrecy::SecretString;
use serde::Deserialize;

use super::WorkspaceSettings;

/// File name of the default database, inside the workspace root.
pub const DATABASE_FILE: &str = "metadata.db";

/// Database connection settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseSettings {
    /// Database connection URL
    /// (default: `sqlite://<workspace root>/metadata.db`)
    #[serde(default)]
    pub url: Option<SecretString>,
}

impl DatabaseSettings {
    /// The configured URL, or the default database under the workspace root
    /// of `workspace`.
    #[must_use]
    pub fn url_for(&self, workspace: &WorkspaceSettings) -> SecretString {
        self.url.clone().unwrap_or_else(|| {
            let path = workspace.resolved_workspace_root().join(DATABASE_FILE);
            SecretString::from(format!("sqlite://{}", path.display()))
        })
    }
}
