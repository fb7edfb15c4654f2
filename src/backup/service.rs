//! Backup service
//!
//! The in-process entry point for everything the engine does: manual
//! backups, listing, schedule configuration and retention cleanup. Only one
//! backup runs at a time per service; a second request while one is in
//! progress fails with [`VaultError::Busy`].

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use super::catalog::{BackupCatalog, BackupClass, BackupMetadata};
use super::packager::{ArchivePackager, BackupResult, DumpFile, OutputMode, PackagedArtifact};
use super::retention::{CleanupReport, RetentionPolicyEngine};
use crate::clock::{Clock, SystemClock};
use crate::config::paths::BackupPaths;
use crate::config::schedule::{BackupScheduleConfig, DatabaseTarget, RetentionPolicy};
use crate::config::settings::Settings;
use crate::dump::{BackupOptions, DatabaseDumpWriter};
use crate::error::{VaultError, VaultResult};
use crate::executor::QueryExecutor;
use crate::storage::remove_file_if_exists;

/// Runs backups and manages the catalog and schedule
pub struct BackupService {
    paths: BackupPaths,
    settings: Settings,
    executor: Arc<dyn QueryExecutor>,
    clock: Arc<dyn Clock>,
    catalog: BackupCatalog,
    run_lock: Mutex<()>,
}

impl BackupService {
    pub fn new(paths: BackupPaths, settings: Settings, executor: Arc<dyn QueryExecutor>) -> Self {
        let catalog = BackupCatalog::from_paths(&paths);
        Self {
            paths,
            settings,
            executor,
            clock: Arc::new(SystemClock),
            catalog,
            run_lock: Mutex::new(()),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn paths(&self) -> &BackupPaths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether a backup is currently running
    pub fn is_busy(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Back up `targets` now, recording the artifact as a manual backup
    pub async fn run_backup(
        &self,
        targets: &[DatabaseTarget],
        options: &BackupOptions,
        mode: OutputMode,
    ) -> BackupResult {
        self.run(targets, options, mode, BackupClass::Manual).await
    }

    /// Back up `targets` as part of the schedule
    pub async fn run_scheduled(&self, targets: &[DatabaseTarget], class: BackupClass) -> BackupResult {
        self.run(targets, &BackupOptions::default(), OutputMode::Archive, class)
            .await
    }

    /// Catalog entries whose files still exist, newest first
    pub fn list_backups(&self) -> VaultResult<Vec<BackupMetadata>> {
        self.catalog.reconcile()
    }

    pub fn schedule_config(&self) -> BackupScheduleConfig {
        BackupScheduleConfig::load(&self.paths)
    }

    /// Validate and persist a new schedule
    pub fn set_schedule_config(&self, config: &BackupScheduleConfig) -> VaultResult<()> {
        config.save(&self.paths)?;
        tracing::info!(
            enabled = config.enabled,
            frequency = ?config.frequency,
            hour = config.hour,
            minute = config.minute,
            "Backup schedule updated"
        );
        Ok(())
    }

    /// Apply the configured retention policy now
    pub async fn cleanup_now(&self) -> VaultResult<CleanupReport> {
        let config = self.schedule_config();
        self.cleanup_with(config.retention).await
    }

    pub async fn cleanup_with(&self, policy: RetentionPolicy) -> VaultResult<CleanupReport> {
        RetentionPolicyEngine::new(policy).apply(&self.catalog).await
    }

    async fn run(
        &self,
        targets: &[DatabaseTarget],
        options: &BackupOptions,
        mode: OutputMode,
        class: BackupClass,
    ) -> BackupResult {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("backup_run", %run_id, class = %class);

        match self
            .try_run(run_id, targets, options, mode, class)
            .instrument(span.clone())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                span.in_scope(|| {
                    tracing::error!(stage = %e.stage(), error = %e, "Backup failed");
                });
                BackupResult::failed(&e, started.elapsed())
            }
        }
    }

    async fn try_run(
        &self,
        run_id: Uuid,
        targets: &[DatabaseTarget],
        options: &BackupOptions,
        mode: OutputMode,
        class: BackupClass,
    ) -> VaultResult<BackupResult> {
        let _guard = self.run_lock.try_lock().map_err(|_| VaultError::Busy)?;

        let started = Instant::now();
        let databases = self.settings.resolve_targets(targets)?;
        self.paths.ensure_directories()?;

        let work_dir = self.paths.temp_dir().join(run_id.to_string());
        tokio::fs::create_dir_all(&work_dir).await.map_err(|e| {
            VaultError::Io(format!("Failed to create work directory {}: {}", work_dir.display(), e))
        })?;

        tracing::info!(databases = ?databases, mode = ?mode, "Backup started");

        let budget = self.settings.operation_timeout();
        let outcome = tokio::time::timeout(
            budget,
            self.produce(&databases, options, mode, class, &work_dir, started),
        )
        .await
        .unwrap_or(Err(VaultError::Timeout {
            stage: "backup",
            after: budget,
        }));

        remove_work_dir(&work_dir).await;

        let result = outcome?;
        tracing::info!(
            file = result.file_name.as_deref().unwrap_or_default(),
            size_bytes = result.size_bytes,
            duration_ms = result.duration_ms,
            tables = result.tables_backed_up.unwrap_or_default(),
            "Backup complete"
        );
        Ok(result)
    }

    async fn produce(
        &self,
        databases: &[String],
        options: &BackupOptions,
        mode: OutputMode,
        class: BackupClass,
        work_dir: &Path,
        started: Instant,
    ) -> VaultResult<BackupResult> {
        let now = self.clock.now();
        let writer = DatabaseDumpWriter::new(Arc::clone(&self.executor), self.settings.field_size_limit);

        let mut dumps = Vec::with_capacity(databases.len());
        for database in databases {
            let path = work_dir.join(dump_file_name(database, now));
            let summary = writer.dump_to_file(database, &path, options).await?;
            dumps.push(DumpFile {
                database: database.clone(),
                path,
                tables_backed_up: summary.tables_backed_up(),
            });
        }
        let tables = dumps.iter().map(|d| d.tables_backed_up).sum();

        // Packaged inside the work dir so an interrupted run leaves nothing in backups/
        let packager = ArchivePackager::new(work_dir);
        let staged = packager
            .package_files(dumps, &artifact_file_name(class, mode, now), mode)
            .await?;

        let artifact = self.publish(staged, now, databases, class).await?;
        Ok(BackupResult::succeeded(&artifact, started.elapsed(), Some(tables)))
    }

    /// Move a packaged artifact into the backup directory and catalog it
    ///
    /// The file is removed again if it cannot be cataloged, so every
    /// artifact in the backup directory has a catalog entry.
    async fn publish(
        &self,
        staged: PackagedArtifact,
        created: DateTime<Utc>,
        databases: &[String],
        class: BackupClass,
    ) -> VaultResult<PackagedArtifact> {
        let path = self.paths.backup_dir().join(&staged.file_name);
        tokio::fs::rename(&staged.path, &path).await.map_err(|e| {
            VaultError::Packaging(format!(
                "Failed to move {} into {}: {}",
                staged.file_name,
                self.paths.backup_dir().display(),
                e
            ))
        })?;

        let entry = BackupMetadata::new(path.clone(), created, databases.to_vec(), class, staged.size_bytes);
        if let Err(e) = self.catalog.append(entry) {
            if let Err(remove_err) = remove_file_if_exists(&path) {
                tracing::warn!(file = %path.display(), error = %remove_err, "Failed to remove uncataloged backup");
            }
            return Err(e);
        }

        Ok(PackagedArtifact { path, ..staged })
    }
}

/// `<database>_backup_<YYYY-MM-DD_HH-MM-SS>.sql`
pub fn dump_file_name(database: &str, at: DateTime<Utc>) -> String {
    format!("{}_backup_{}.sql", database, at.format("%Y-%m-%d_%H-%M-%S"))
}

/// `backup_<class>_<YYYYMMDD-HHMMSS-mmm>.<zip|sql>`
pub fn artifact_file_name(class: BackupClass, mode: OutputMode, at: DateTime<Utc>) -> String {
    format!(
        "backup_{}_{}-{:03}.{}",
        class,
        at.format("%Y%m%d-%H%M%S"),
        at.timestamp_subsec_millis(),
        mode.extension()
    )
}

async fn remove_work_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove work directory");
        }
    }
}
