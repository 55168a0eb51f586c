//! Configuration management for Warden
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (WARDEN_* prefix, highest precedence)
//! 2. warden.local.toml (gitignored, local overrides)
//! 3. warden.toml (git-tracked, project config)
//! 4. ~/.config/warden/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! The resulting [`AuthConfig`] is immutable once handed to the engine.

use serde::{Deserialize, Serialize};
use std::path::Path;
use warden_types::StatusCodes;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{LOCAL_FILE, PROJECT_FILE, Paths};

/// Default `time_format`: `2026-01-31 08:15:00`.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Authorization engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Role table name.
    pub role_table: String,
    /// User-role binding table name.
    pub access_table: String,
    /// Permission rule table name.
    pub rule_table: String,
    /// Sentinel in a role's rule list meaning "all permissions".
    pub admin_mark: String,
    /// Stored status code of an effective node.
    pub effective_status: i64,
    /// Stored status code of an invalid node.
    pub invalid_status: i64,
    /// Emit audit events from every check.
    pub audit: bool,
    /// Maintain `create_time` / `update_time` columns.
    pub write_time: bool,
    /// chrono format string for timestamps; empty stores unix seconds.
    pub time_format: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            role_table: "auth_role".to_string(),
            access_table: "auth_access".to_string(),
            rule_table: "auth_rule".to_string(),
            admin_mark: "*".to_string(),
            effective_status: 1,
            invalid_status: 0,
            audit: false,
            write_time: true,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from default locations
    pub fn load() -> anyhow::Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Parse a single TOML document, then validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a single TOML file, then validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Status codes as a typed pair.
    pub fn status_codes(&self) -> StatusCodes {
        StatusCodes::new(self.effective_status, self.invalid_status)
    }

    /// Enables audit events.
    pub fn with_audit(mut self) -> Self {
        self.audit = true;
        self
    }

    /// Disables timestamp columns.
    pub fn without_timestamps(mut self) -> Self {
        self.write_time = false;
        self
    }

    /// Checks invariants the engine relies on.
    ///
    /// Table names end up inside SQL text, so they must be plain identifiers.
    /// The admin mark shares a column with numeric ids and the `,` delimiter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: String| Err(ConfigError::ValidationError { key, reason });

        for (key, table) in [
            ("role_table", &self.role_table),
            ("access_table", &self.access_table),
            ("rule_table", &self.rule_table),
        ] {
            if !is_identifier(table) {
                return invalid(key, format!("expected a plain identifier, got {table:?}"));
            }
        }

        if self.role_table == self.rule_table
            || self.role_table == self.access_table
            || self.rule_table == self.access_table
        {
            return invalid(
                "tables",
                "role, access and rule tables must be distinct".to_string(),
            );
        }

        if self.effective_status == self.invalid_status {
            return invalid(
                "status",
                format!(
                    "effective and invalid codes must differ (both {})",
                    self.effective_status
                ),
            );
        }

        let mark = self.admin_mark.trim();
        if mark.is_empty() || mark != self.admin_mark {
            return invalid(
                "admin_mark",
                "must be non-empty without surrounding whitespace".to_string(),
            );
        }
        if mark.contains(',') || mark.parse::<u64>().is_ok() {
            return invalid(
                "admin_mark",
                format!("{mark:?} collides with the rule id list format"),
            );
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
