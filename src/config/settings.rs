//! Engine settings for dumpvault
//!
//! Manages the database endpoints the engine backs up and the operational
//! limits applied to every run (timeouts, field ceiling, check cadence).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::BackupPaths;
use super::schedule::DatabaseTarget;
use crate::error::VaultError;

/// Strings and JSON values longer than this are truncated in dumps
pub const DEFAULT_FIELD_SIZE_LIMIT: usize = 1024 * 1024;

/// One database the engine can back up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEndpoint {
    /// Logical database name, used in file names and dump headers
    pub name: String,
    /// Connection URL handed to the query executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl DatabaseEndpoint {
    /// Create an endpoint without a connection URL
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// The primary database
    #[serde(default = "default_primary")]
    pub primary: DatabaseEndpoint,

    /// The secondary database, if one is configured
    #[serde(default)]
    pub secondary: Option<DatabaseEndpoint>,

    /// Maximum byte length of a single text or JSON value in a dump
    #[serde(default = "default_field_size_limit")]
    pub field_size_limit: usize,

    /// Seconds between scheduler due-checks
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Wall-clock budget for one backup run
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Width of the window after the scheduled minute in which a run is due
    #[serde(default = "default_due_window_minutes")]
    pub due_window_minutes: u32,
}

fn default_schema_version() -> u32 {
    1
}

fn default_primary() -> DatabaseEndpoint {
    DatabaseEndpoint::named("primary")
}

fn default_field_size_limit() -> usize {
    DEFAULT_FIELD_SIZE_LIMIT
}

fn default_check_interval_secs() -> u64 {
    300
}

fn default_operation_timeout_secs() -> u64 {
    900
}

fn default_due_window_minutes() -> u32 {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            primary: default_primary(),
            secondary: None,
            field_size_limit: default_field_size_limit(),
            check_interval_secs: default_check_interval_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            due_window_minutes: default_due_window_minutes(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or return defaults if the file doesn't exist
    ///
    /// Connection URLs from `DUMPVAULT_PRIMARY_URL` and
    /// `DUMPVAULT_SECONDARY_URL` take precedence over the file.
    pub fn load_or_create(paths: &BackupPaths) -> Result<Self, VaultError> {
        let settings_path = paths.settings_file();

        let mut settings = if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path)
                .map_err(|e| VaultError::Io(format!("Failed to read settings file: {}", e)))?;

            serde_json::from_str(&contents)
                .map_err(|e| VaultError::Config(format!("Failed to parse settings file: {}", e)))?
        } else {
            Settings::default()
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, paths: &BackupPaths) -> Result<(), VaultError> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| VaultError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(paths.settings_file(), contents)
            .map_err(|e| VaultError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DUMPVAULT_PRIMARY_URL") {
            self.primary.url = Some(url);
        }
        if let Ok(url) = std::env::var("DUMPVAULT_SECONDARY_URL") {
            match self.secondary.as_mut() {
                Some(secondary) => secondary.url = Some(url),
                None => {
                    self.secondary = Some(DatabaseEndpoint {
                        name: "secondary".to_string(),
                        url: Some(url),
                    })
                }
            }
        }
    }

    /// Wall-clock budget for one backup run
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Interval between scheduler due-checks
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    /// All configured endpoints, primary first
    pub fn endpoints(&self) -> impl Iterator<Item = &DatabaseEndpoint> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }

    /// Resolve schedule targets into database names, primary first, without duplicates
    pub fn resolve_targets(&self, targets: &[DatabaseTarget]) -> Result<Vec<String>, VaultError> {
        let mut wants_primary = false;
        let mut wants_secondary = false;

        for target in targets {
            match target {
                DatabaseTarget::Primary => wants_primary = true,
                DatabaseTarget::Secondary => wants_secondary = true,
                DatabaseTarget::Both => {
                    wants_primary = true;
                    if self.secondary.is_some() {
                        wants_secondary = true;
                    } else {
                        tracing::warn!("Both databases requested but no secondary is configured");
                    }
                }
            }
        }

        let mut names = Vec::new();
        if wants_primary {
            names.push(self.primary.name.clone());
        }
        if wants_secondary {
            let secondary = self.secondary.as_ref().ok_or_else(|| {
                VaultError::Config("Secondary database requested but not configured".into())
            })?;
            if !names.contains(&secondary.name) {
                names.push(secondary.name.clone());
            }
        }

        if names.is_empty() {
            return Err(VaultError::Validation(
                "At least one database must be selected".into(),
            ));
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn two_databases() -> Settings {
        Settings {
            primary: DatabaseEndpoint::named("alpha"),
            secondary: Some(DatabaseEndpoint::named("beta")),
            ..Settings::default()
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.field_size_limit, 1024 * 1024);
        assert_eq!(settings.check_interval(), Duration::from_secs(300));
        assert_eq!(settings.operation_timeout(), Duration::from_secs(900));
        assert!(settings.secondary.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut settings = two_databases();
        settings.field_size_limit = 2048;
        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.field_size_limit, 2048);
        assert_eq!(loaded.primary.name, "alpha");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp_dir.path().to_path_buf());
        std::fs::write(paths.settings_file(), r#"{"operation_timeout_secs": 60}"#).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.operation_timeout_secs, 60);
        assert_eq!(loaded.check_interval_secs, 300);
    }

    #[test]
    fn test_resolve_both() {
        let settings = two_databases();
        let names = settings.resolve_targets(&[DatabaseTarget::Both]).unwrap();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_resolve_deduplicates() {
        let settings = two_databases();
        let names = settings
            .resolve_targets(&[
                DatabaseTarget::Secondary,
                DatabaseTarget::Primary,
                DatabaseTarget::Both,
            ])
            .unwrap();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_resolve_both_without_secondary() {
        let settings = Settings::default();
        let names = settings.resolve_targets(&[DatabaseTarget::Both]).unwrap();
        assert_eq!(names, vec!["primary"]);
    }

    #[test]
    fn test_resolve_missing_secondary_fails() {
        let settings = Settings::default();
        assert!(settings
            .resolve_targets(&[DatabaseTarget::Secondary])
            .is_err());
        assert!(settings.resolve_targets(&[]).is_err());
    }
}
