//! dumpvault - Streaming database backups with weekly/monthly retention
//!
//! This library produces point-in-time SQL backups of one or more
//! relational databases without a native dump binary, packages them into a
//! single artifact and rotates old backups on a schedule.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Paths, engine settings and the persisted backup schedule
//! - `error`: Error taxonomy and failure stages
//! - `storage`: Atomic JSON file helpers
//! - `executor`: The query-executor seam (PostgreSQL and in-memory)
//! - `dump`: Table enumeration and streaming per-table / per-database dumps
//! - `backup`: Packaging, catalog, retention, the backup service and scheduler
//! - `clock`: Time source
//! - `cli`: Command handlers for the `dumpvault` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use dumpvault::config::{BackupPaths, Settings};
//!
//! let paths = BackupPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! ```

pub mod backup;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dump;
pub mod error;
pub mod executor;
pub mod storage;

pub use error::{VaultError, VaultResult};

/// Name written into dump headers and archive manifests
pub const TOOL_NAME: &str = "dumpvault";

/// Crate version written alongside [`TOOL_NAME`]
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
