//! Backup catalog
//!
//! A JSON array of [`BackupMetadata`] records, one per artifact produced.
//! The catalog is what retention decisions are computed from, so it is kept
//! in step with the files on disk: entries are appended only after an
//! artifact is complete and dropped when their file goes away.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::paths::BackupPaths;
use crate::error::VaultResult;
use crate::storage::file_io::{read_json, write_json_atomic};

/// Class of a backup, which decides how retention treats it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupClass {
    /// Triggered by hand; never removed by retention
    Manual,
    Weekly,
    Monthly,
}

impl std::fmt::Display for BackupClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Manual => "manual",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        };
        f.write_str(name)
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub filename: String,
    pub path: PathBuf,
    pub created: DateTime<Utc>,
    pub databases: Vec<String>,
    #[serde(rename = "type")]
    pub class: BackupClass,
    pub size: u64,
    /// ISO week bucket, `YYYY-WW`
    pub week: String,
    /// Month bucket, `YYYY-MM`
    pub month: String,
}

impl BackupMetadata {
    pub fn new(
        path: PathBuf,
        created: DateTime<Utc>,
        databases: Vec<String>,
        class: BackupClass,
        size: u64,
    ) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            filename,
            path,
            created,
            databases,
            class,
            size,
            week: week_bucket(created),
            month: month_bucket(created),
        }
    }
}

/// ISO week bucket key (`YYYY-WW`), using the ISO week-numbering year
pub fn week_bucket(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-{:02}", week.year(), week.week())
}

/// Calendar month bucket key (`YYYY-MM`)
pub fn month_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Calendar day bucket key (`YYYY-MM-DD`)
pub fn day_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// The persisted catalog
///
/// Every read-modify-write cycle holds an internal lock so that concurrent
/// appends and cleanups within one process cannot lose entries.
#[derive(Debug)]
pub struct BackupCatalog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl BackupCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_paths(paths: &BackupPaths) -> Self {
        Self::new(paths.catalog_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries as stored, newest first
    pub fn entries(&self) -> VaultResult<Vec<BackupMetadata>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load()?;
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    /// Record a completed backup
    pub fn append(&self, entry: BackupMetadata) -> VaultResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load()?;
        entries.push(entry);
        self.save(&entries)
    }

    /// Remove the entries with these file names
    pub fn remove(&self, filenames: &[String]) -> VaultResult<usize> {
        if filenames.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| !filenames.contains(&e.filename));
        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries)?;
        }
        Ok(removed)
    }

    /// Drop entries whose file no longer exists, returning the survivors newest first
    pub fn reconcile(&self) -> VaultResult<Vec<BackupMetadata>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| e.path.exists());

        if entries.len() != before {
            tracing::warn!(
                removed = before - entries.len(),
                "Dropped catalog entries for missing backup files"
            );
            self.save(&entries)?;
        }

        sort_newest_first(&mut entries);
        Ok(entries)
    }

    fn load(&self) -> VaultResult<Vec<BackupMetadata>> {
        read_json(&self.path)
    }

    fn save(&self, entries: &[BackupMetadata]) -> VaultResult<()> {
        write_json_atomic(&self.path, &entries)
    }
}

fn sort_newest_first(entries: &mut [BackupMetadata]) {
    entries.sort_by(|a, b| b.created.cmp(&a.created));
}
