//! Retention policy
//!
//! Planning is a pure function over the catalog entries. Weekly and monthly
//! entries are grouped by their week or month bucket; the newest
//! `keep_weekly` / `keep_monthly` buckets each keep their most recent entry
//! and everything else is marked for deletion. Manual entries are always kept.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::catalog::{BackupCatalog, BackupClass, BackupMetadata};
use crate::config::schedule::RetentionPolicy;
use crate::error::VaultResult;

/// Keep/delete partition of the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<BackupMetadata>,
    pub delete: Vec<BackupMetadata>,
}

/// A file that could not be deleted
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupFailure {
    pub filename: String,
    pub error: String,
}

/// What a cleanup did
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted: Vec<BackupMetadata>,
    pub failed: Vec<CleanupFailure>,
    pub kept: usize,
}

/// Applies a [`RetentionPolicy`] to a catalog
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicyEngine {
    policy: RetentionPolicy,
}

impl RetentionPolicyEngine {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    /// Partition `entries` into kept and deleted sets
    pub fn plan(&self, entries: &[BackupMetadata]) -> RetentionPlan {
        let mut doomed: HashSet<usize> = HashSet::new();
        doomed.extend(doomed_in_class(
            entries,
            BackupClass::Weekly,
            |e| &e.week,
            self.policy.keep_weekly,
        ));
        doomed.extend(doomed_in_class(
            entries,
            BackupClass::Monthly,
            |e| &e.month,
            self.policy.keep_monthly,
        ));

        let mut plan = RetentionPlan::default();
        for (index, entry) in entries.iter().enumerate() {
            if doomed.contains(&index) {
                plan.delete.push(entry.clone());
            } else {
                plan.keep.push(entry.clone());
            }
        }
        plan
    }

    /// Delete the files the plan marks and drop them from the catalog
    ///
    /// A file that cannot be deleted is logged, reported and left in the
    /// catalog; the remaining deletions still go ahead.
    pub async fn apply(&self, catalog: &BackupCatalog) -> VaultResult<CleanupReport> {
        let entries = catalog.reconcile()?;
        let plan = self.plan(&entries);

        let mut report = CleanupReport {
            kept: plan.keep.len(),
            ..CleanupReport::default()
        };

        for entry in plan.delete {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {
                    tracing::info!(file = %entry.filename, class = %entry.class, "Deleted expired backup");
                    report.deleted.push(entry);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.deleted.push(entry);
                }
                Err(e) => {
                    tracing::error!(file = %entry.filename, error = %e, "Failed to delete expired backup");
                    report.kept += 1;
                    report.failed.push(CleanupFailure {
                        filename: entry.filename,
                        error: e.to_string(),
                    });
                }
            }
        }

        let removed: Vec<String> = report.deleted.iter().map(|e| e.filename.clone()).collect();
        catalog.remove(&removed)?;

        tracing::info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            kept = report.kept,
            "Retention cleanup complete"
        );

        Ok(report)
    }
}

fn doomed_in_class<F>(entries: &[BackupMetadata], class: BackupClass, bucket: F, keep: u32) -> Vec<usize>
where
    F: Fn(&BackupMetadata) -> &String,
{
    let mut buckets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        if entry.class == class {
            buckets.entry(bucket(entry).as_str()).or_default().push(index);
        }
    }

    let mut doomed = Vec::new();
    for (rank, (_, mut members)) in buckets.into_iter().rev().enumerate() {
        if rank < keep as usize {
            // Newest first; ties broken by file name so the choice is stable
            members.sort_by(|&a, &b| {
                entries[b]
                    .created
                    .cmp(&entries[a].created)
                    .then_with(|| entries[b].filename.cmp(&entries[a].filename))
            });
            doomed.extend(members.into_iter().skip(1));
        } else {
            doomed.extend(members);
        }
    }
    doomed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn meta(name: &str, created: DateTime<Utc>, class: BackupClass) -> BackupMetadata {
        BackupMetadata::new(PathBuf::from(name), created, vec!["primary".into()], class, 1)
    }

    fn names(entries: &[BackupMetadata]) -> Vec<&str> {
        let mut names: Vec<&str> = entries.iter().map(|e| e.filename.as_str()).collect();
        names.sort();
        names
    }

    fn policy(keep_weekly: u32, keep_monthly: u32) -> RetentionPolicyEngine {
        RetentionPolicyEngine::new(RetentionPolicy {
            keep_weekly,
            keep_monthly,
        })
    }

    #[test]
    fn test_keeps_newest_weekly_buckets() {
        // Mondays of ISO weeks 1-4 of 2024
        let entries = vec![
            meta("w1", at(1, 2), BackupClass::Weekly),
            meta("w2", at(8, 2), BackupClass::Weekly),
            meta("w3", at(15, 2), BackupClass::Weekly),
            meta("w4", at(22, 2), BackupClass::Weekly),
        ];

        let plan = policy(2, 3).plan(&entries);

        assert_eq!(names(&plan.keep), vec!["w3", "w4"]);
        assert_eq!(names(&plan.delete), vec!["w1", "w2"]);
    }

    #[test]
    fn test_one_survivor_per_bucket() {
        let entries = vec![
            meta("early", at(8, 2), BackupClass::Weekly),
            meta("late", at(10, 2), BackupClass::Weekly),
            meta("middle", at(9, 2), BackupClass::Weekly),
        ];

        let plan = policy(4, 3).plan(&entries);

        assert_eq!(names(&plan.keep), vec!["late"]);
        assert_eq!(names(&plan.delete), vec!["early", "middle"]);
    }

    #[test]
    fn test_manual_never_deleted() {
        let mut entries: Vec<BackupMetadata> = (0..20)
            .map(|i| {
                meta(
                    &format!("manual-{}", i),
                    at(1, 0) - Duration::weeks(i),
                    BackupClass::Manual,
                )
            })
            .collect();
        entries.push(meta("weekly", at(1, 2), BackupClass::Weekly));

        let plan = policy(1, 1).plan(&entries);

        assert!(plan.delete.is_empty());
        assert_eq!(plan.keep.len(), 21);
    }

    #[test]
    fn test_classes_are_independent() {
        let entries = vec![
            meta("m-jan", Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap(), BackupClass::Monthly),
            meta("m-feb", Utc.with_ymd_and_hms(2024, 2, 5, 2, 0, 0).unwrap(), BackupClass::Monthly),
            meta("m-mar", Utc.with_ymd_and_hms(2024, 3, 4, 2, 0, 0).unwrap(), BackupClass::Monthly),
            meta("w-mar", Utc.with_ymd_and_hms(2024, 3, 11, 2, 0, 0).unwrap(), BackupClass::Weekly),
        ];

        let plan = policy(1, 2).plan(&entries);

        assert_eq!(names(&plan.keep), vec!["m-feb", "m-mar", "w-mar"]);
        assert_eq!(names(&plan.delete), vec!["m-jan"]);
    }

    #[tokio::test]
    async fn test_apply_deletes_files_and_updates_catalog() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = BackupCatalog::new(temp_dir.path().join("catalog.json"));
        for (name, day) in [("w1.zip", 1), ("w2.zip", 8), ("w3.zip", 15)] {
            let path = temp_dir.path().join(name);
            std::fs::write(&path, b"zip").unwrap();
            catalog
                .append(BackupMetadata::new(path, at(day, 2), vec!["primary".into()], BackupClass::Weekly, 3))
                .unwrap();
        }

        let report = policy(1, 1).apply(&catalog).await.unwrap();

        assert_eq!(names(&report.deleted), vec!["w1.zip", "w2.zip"]);
        assert!(report.failed.is_empty());
        assert_eq!(report.kept, 1);
        assert!(!temp_dir.path().join("w1.zip").exists());
        assert!(temp_dir.path().join("w3.zip").exists());
        assert_eq!(names(&catalog.entries().unwrap()), vec!["w3.zip"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_apply_keeps_entry_when_delete_fails() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let locked = temp_dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();

        let base = temp_dir.path().to_path_buf();
        let catalog = BackupCatalog::new(base.join("catalog.json"));
        for (dir, name, day) in [(&locked, "old.zip", 1), (&base, "older.zip", 8), (&base, "new.zip", 15)] {
            let path = dir.join(name);
            std::fs::write(&path, b"zip").unwrap();
            catalog
                .append(BackupMetadata::new(path, at(day, 2), vec!["primary".into()], BackupClass::Weekly, 3))
                .unwrap();
        }
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        let report = policy(1, 1).apply(&catalog).await.unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Root ignores directory permissions
        if report.failed.is_empty() {
            return;
        }
        assert_eq!(report.failed[0].filename, "old.zip");
        assert_eq!(names(&report.deleted), vec!["older.zip"]);
        assert_eq!(names(&catalog.entries().unwrap()), vec!["new.zip", "old.zip"]);
    }
}
