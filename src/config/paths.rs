//! Path management for dumpvault
//!
//! Provides XDG-compliant path resolution for settings, the schedule, the
//! backup catalog and the backup artifacts themselves.
//!
//! ## Path Resolution Order
//!
//! 1. `DUMPVAULT_DATA_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/dumpvault` or `~/.config/dumpvault`
//! 3. Windows: `%APPDATA%\dumpvault`

use std::path::PathBuf;

use crate::error::VaultError;

/// Manages all paths used by dumpvault
#[derive(Debug, Clone)]
pub struct BackupPaths {
    /// Base directory for all dumpvault state
    base_dir: PathBuf,
}

impl BackupPaths {
    /// Create a new BackupPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, VaultError> {
        let base_dir = if let Ok(custom) = std::env::var("DUMPVAULT_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create BackupPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Directory holding finished backup artifacts
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Scratch directory for per-database dump files before packaging
    pub fn temp_dir(&self) -> PathBuf {
        self.backup_dir().join("tmp")
    }

    /// Get the path to the engine settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the persisted schedule
    pub fn schedule_file(&self) -> PathBuf {
        self.base_dir.join("backup_schedule.json")
    }

    /// Get the path to the backup catalog
    pub fn catalog_file(&self) -> PathBuf {
        self.backup_dir().join("backup_catalog.json")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), VaultError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| VaultError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.backup_dir())
            .map_err(|e| VaultError::Io(format!("Failed to create backup directory: {}", e)))?;

        std::fs::create_dir_all(self.temp_dir())
            .map_err(|e| VaultError::Io(format!("Failed to create temp directory: {}", e)))?;

        Ok(())
    }
}

/// Resolve the default data directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, VaultError> {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(config_home).join("dumpvault"));
    }

    let home = std::env::var("HOME")
        .map_err(|_| VaultError::Config("HOME environment variable not set".into()))?;
    Ok(PathBuf::from(home).join(".config").join("dumpvault"))
}

/// Resolve the default data directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, VaultError> {
    let appdata = std::env::var("APPDATA")
        .map_err(|_| VaultError::Config("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("dumpvault"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_custom_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.base_dir(), temp_dir.path());
        assert_eq!(paths.backup_dir(), temp_dir.path().join("backups"));
        assert_eq!(
            paths.temp_dir(),
            temp_dir.path().join("backups").join("tmp")
        );
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp_dir.path().join("nested"));

        paths.ensure_directories().unwrap();

        assert!(paths.backup_dir().exists());
        assert!(paths.temp_dir().exists());
    }

    #[test]
    fn test_file_paths() {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp_dir.path().to_path_buf());

        assert_eq!(paths.settings_file(), temp_dir.path().join("config.json"));
        assert_eq!(
            paths.schedule_file(),
            temp_dir.path().join("backup_schedule.json")
        );
        assert_eq!(
            paths.catalog_file(),
            temp_dir.path().join("backups").join("backup_catalog.json")
        );
    }
}
