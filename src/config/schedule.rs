//! Persisted backup schedule
//!
//! The schedule is stored as JSON next to the settings file. A missing file
//! means the built-in defaults apply: enabled, weekly on Sunday at 02:00,
//! both databases, keeping 4 weekly and 3 monthly backups. A malformed file
//! is reported and the defaults are used instead.

use serde::{Deserialize, Serialize};

use super::paths::BackupPaths;
use crate::error::{VaultError, VaultResult};
use crate::storage::file_io::{read_json_required, write_json_atomic};

/// How often a scheduled backup is due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// Once per day at the configured time
    Daily,
    /// Once per week on the configured day
    #[default]
    Weekly,
    /// Once per month, the first time the configured time comes round
    Monthly,
}

impl std::str::FromStr for Frequency {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(VaultError::Validation(format!(
                "Unknown frequency '{}', expected daily, weekly or monthly",
                other
            ))),
        }
    }
}

/// Which configured database(s) a backup covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseTarget {
    Primary,
    Secondary,
    Both,
}

impl std::str::FromStr for DatabaseTarget {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            "both" => Ok(Self::Both),
            other => Err(VaultError::Validation(format!(
                "Unknown database target '{}', expected primary, secondary or both",
                other
            ))),
        }
    }
}

/// How many scheduled backups survive cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Number of week buckets to keep
    pub keep_weekly: u32,
    /// Number of month buckets to keep
    pub keep_monthly: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_weekly: 4,
            keep_monthly: 3,
        }
    }
}

/// Persisted schedule configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleConfig {
    pub enabled: bool,
    pub frequency: Frequency,
    /// 0 = Sunday; only meaningful for weekly schedules
    pub day_of_week: u32,
    pub hour: u32,
    pub minute: u32,
    pub databases: Vec<DatabaseTarget>,
    pub retention: RetentionPolicy,
}

impl Default for BackupScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Weekly,
            day_of_week: 0,
            hour: 2,
            minute: 0,
            databases: vec![DatabaseTarget::Both],
            retention: RetentionPolicy::default(),
        }
    }
}

impl BackupScheduleConfig {
    /// Load the schedule, falling back to defaults when absent or malformed
    pub fn load(paths: &BackupPaths) -> Self {
        let path = paths.schedule_file();
        if !path.exists() {
            return Self::default();
        }

        match read_json_required::<Self, _>(&path).and_then(|config| {
            config.validate()?;
            Ok(config)
        }) {
            Ok(config) => config,
            Err(e) => {
                let err = VaultError::Config(format!(
                    "Ignoring schedule file {}: {}",
                    path.display(),
                    e
                ));
                tracing::warn!(error = %err, "Using default backup schedule");
                Self::default()
            }
        }
    }

    /// Validate and persist the schedule
    pub fn save(&self, paths: &BackupPaths) -> VaultResult<()> {
        self.validate()?;
        write_json_atomic(paths.schedule_file(), self)
    }

    /// Check every field is within range
    pub fn validate(&self) -> VaultResult<()> {
        if self.day_of_week > 6 {
            return Err(VaultError::Validation(format!(
                "dayOfWeek must be 0-6, got {}",
                self.day_of_week
            )));
        }
        if self.hour > 23 {
            return Err(VaultError::Validation(format!(
                "hour must be 0-23, got {}",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(VaultError::Validation(format!(
                "minute must be 0-59, got {}",
                self.minute
            )));
        }
        if self.databases.is_empty() {
            return Err(VaultError::Validation(
                "databases must name at least one target".into(),
            ));
        }
        if self.retention.keep_weekly < 1 || self.retention.keep_monthly < 1 {
            return Err(VaultError::Validation(
                "retention counts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_paths() -> (BackupPaths, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp_dir.path().to_path_buf());
        (paths, temp_dir)
    }

    #[test]
    fn test_defaults() {
        let config = BackupScheduleConfig::default();
        assert!(config.enabled);
        assert_eq!(config.frequency, Frequency::Weekly);
        assert_eq!(config.day_of_week, 0);
        assert_eq!(config.hour, 2);
        assert_eq!(config.minute, 0);
        assert_eq!(config.databases, vec![DatabaseTarget::Both]);
        assert_eq!(config.retention.keep_weekly, 4);
        assert_eq!(config.retention.keep_monthly, 3);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let (paths, _temp) = test_paths();
        assert_eq!(
            BackupScheduleConfig::load(&paths),
            BackupScheduleConfig::default()
        );
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let (paths, _temp) = test_paths();
        std::fs::write(paths.schedule_file(), "{ not json").unwrap();
        assert_eq!(
            BackupScheduleConfig::load(&paths),
            BackupScheduleConfig::default()
        );
    }

    #[test]
    fn test_out_of_range_file_uses_defaults() {
        let (paths, _temp) = test_paths();
        let mut config = BackupScheduleConfig::default();
        config.hour = 30;
        std::fs::write(
            paths.schedule_file(),
            serde_json::to_string(&config).unwrap(),
        )
        .unwrap();

        assert_eq!(BackupScheduleConfig::load(&paths).hour, 2);
    }

    #[test]
    fn test_save_and_load() {
        let (paths, _temp) = test_paths();
        let config = BackupScheduleConfig {
            enabled: false,
            frequency: Frequency::Daily,
            day_of_week: 3,
            hour: 23,
            minute: 45,
            databases: vec![DatabaseTarget::Primary],
            retention: RetentionPolicy {
                keep_weekly: 2,
                keep_monthly: 6,
            },
        };

        config.save(&paths).unwrap();
        assert_eq!(BackupScheduleConfig::load(&paths), config);
    }

    #[test]
    fn test_camel_case_on_disk() {
        let json = serde_json::to_value(BackupScheduleConfig::default()).unwrap();
        assert_eq!(json["dayOfWeek"], 0);
        assert_eq!(json["retention"]["keepWeekly"], 4);
        assert_eq!(json["frequency"], "weekly");
        assert_eq!(json["databases"][0], "both");
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = BackupScheduleConfig::default();
        config.day_of_week = 7;
        assert!(config.validate().unwrap_err().is_validation());

        let mut config = BackupScheduleConfig::default();
        config.retention.keep_monthly = 0;
        assert!(config.validate().is_err());

        let mut config = BackupScheduleConfig::default();
        config.databases.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Monthly".parse::<Frequency>().unwrap(), Frequency::Monthly);
        assert_eq!(
            "both".parse::<DatabaseTarget>().unwrap(),
            DatabaseTarget::Both
        );
        assert!("hourly".parse::<Frequency>().is_err());
    }
}
