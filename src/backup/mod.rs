//! Backup runs, packaging, catalog and retention
//!
//! # Architecture
//!
//! - [`packager`]: turns per-database dump files into one artifact (combined SQL or ZIP)
//! - [`catalog`]: the JSON record of every artifact produced
//! - [`retention`]: keep/delete planning over the catalog and its application
//! - [`service`]: `BackupService`, the entry point for manual runs, listing and cleanup
//! - [`scheduler`]: the periodic due-check loop
//!
//! # Retention Policy
//!
//! By default the schedule keeps:
//! - 4 weekly backups (one per ISO week)
//! - 3 monthly backups (one per calendar month)
//!
//! Manual backups are never removed by retention.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dumpvault::backup::{BackupService, OutputMode};
//! use dumpvault::config::{BackupPaths, DatabaseTarget, Settings};
//! use dumpvault::dump::BackupOptions;
//! use dumpvault::executor::PgExecutor;
//!
//! let paths = BackupPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let executor = Arc::new(PgExecutor::from_settings(&settings)?);
//! let service = BackupService::new(paths, settings, executor);
//!
//! let result = service
//!     .run_backup(&[DatabaseTarget::Both], &BackupOptions::default(), OutputMode::Archive)
//!     .await;
//! println!("{:?}", result.file_path);
//! ```

pub mod catalog;
pub mod packager;
pub mod retention;
pub mod scheduler;
pub mod service;

pub use catalog::{BackupCatalog, BackupClass, BackupMetadata};
pub use packager::{ArchivePackager, BackupResult, DumpFile, OutputMode, PackagedArtifact};
pub use retention::{CleanupFailure, CleanupReport, RetentionPlan, RetentionPolicyEngine};
pub use scheduler::{evaluate_due, BackupScheduler, CheckOutcome, DueDecision, SchedulerStatus};
pub use service::BackupService;
