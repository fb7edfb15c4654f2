//! Configuration module for dumpvault
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - Engine settings persistence
//! - The persisted backup schedule

pub mod paths;
pub mod schedule;
pub mod settings;

pub use paths::BackupPaths;
pub use schedule::{BackupScheduleConfig, DatabaseTarget, Frequency, RetentionPolicy};
pub use settings::{DatabaseEndpoint, Settings};
