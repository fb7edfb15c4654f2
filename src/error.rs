//! Custom error types for dumpvault
//!
//! This module defines the error hierarchy for the backup engine using
//! thiserror for ergonomic error definitions. Every error maps onto a
//! [`FailureStage`] so that callers can tell operators which part of a
//! backup run failed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The stage of a backup run that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Table or column metadata could not be read
    Introspection,
    /// Row data could not be read or written
    Export,
    /// Combining or compressing the dump files failed
    Packaging,
    /// The run exceeded its wall-clock budget
    Timeout,
    /// Configuration could not be read or was invalid
    Config,
    /// Catalog or other local file storage failed
    Storage,
    /// Another backup run was already in progress
    Busy,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Introspection => "introspection",
            Self::Export => "export",
            Self::Packaging => "packaging",
            Self::Timeout => "timeout",
            Self::Config => "config",
            Self::Storage => "storage",
            Self::Busy => "busy",
        };
        f.write_str(name)
    }
}

/// The main error type for dumpvault operations
#[derive(Error, Debug)]
pub enum VaultError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Catalog and settings file storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// A query failed outside the scope of a single table
    #[error("Query error: {0}")]
    Query(String),

    /// Table or column metadata query failed
    #[error("Introspection failed for {table}: {message}")]
    Introspection { table: String, message: String },

    /// A batched SELECT failed mid-stream
    #[error("Data export failed for {table}: {message}")]
    DataExport { table: String, message: String },

    /// Combining or archiving the dump files failed
    #[error("Packaging error: {0}")]
    Packaging(String),

    /// The operation exceeded its wall-clock budget
    #[error("Processing timeout: {stage} did not finish within {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },

    /// Another backup run holds the run lock
    #[error("A backup is already in progress")]
    Busy,

    /// A backup run that was reported through a failed result
    #[error("Backup failed at stage {stage}: {message}")]
    RunFailed { stage: FailureStage, message: String },

    /// Validation errors for configuration values
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },
}

impl VaultError {
    /// Create an introspection error for a table
    pub fn introspection(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Introspection {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a data export error for a table
    pub fn data_export(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::DataExport {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Rebuild an error from a failed run's stage and message
    ///
    /// A run that carries no stage failed while packaging.
    pub fn run_failed(stage: Option<FailureStage>, message: impl Into<String>) -> Self {
        Self::RunFailed {
            stage: stage.unwrap_or(FailureStage::Packaging),
            message: message.into(),
        }
    }

    /// The stage of a backup run this error belongs to
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Introspection { .. } | Self::Query(_) => FailureStage::Introspection,
            Self::DataExport { .. } => FailureStage::Export,
            Self::Packaging(_) | Self::Io(_) => FailureStage::Packaging,
            Self::Timeout { .. } => FailureStage::Timeout,
            Self::Config(_) | Self::Validation(_) => FailureStage::Config,
            Self::Storage(_) | Self::Json(_) | Self::NotFound { .. } => FailureStage::Storage,
            Self::Busy => FailureStage::Busy,
            Self::RunFailed { stage, .. } => *stage,
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<sqlx::Error> for VaultError {
    fn from(err: sqlx::Error) -> Self {
        Self::Query(err.to_string())
    }
}

impl From<zip::result::ZipError> for VaultError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Packaging(err.to_string())
    }
}

/// Result type alias for dumpvault operations
pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VaultError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_timeout_display_and_stage() {
        let err = VaultError::Timeout {
            stage: "backup",
            after: Duration::from_secs(900),
        };
        assert_eq!(
            err.to_string(),
            "Processing timeout: backup did not finish within 900s"
        );
        assert!(err.is_timeout());
        assert_eq!(err.stage(), FailureStage::Timeout);
    }

    #[test]
    fn test_table_errors_carry_stage() {
        let err = VaultError::introspection("public.users", "permission denied");
        assert_eq!(err.stage(), FailureStage::Introspection);
        assert_eq!(
            err.to_string(),
            "Introspection failed for public.users: permission denied"
        );

        let err = VaultError::data_export("public.users", "connection reset");
        assert_eq!(err.stage(), FailureStage::Export);
    }

    #[test]
    fn test_run_failed_keeps_stage() {
        let err = VaultError::run_failed(
            Some(FailureStage::Introspection),
            "Introspection failed for public.users: permission denied",
        );
        assert_eq!(err.stage(), FailureStage::Introspection);
        assert_eq!(
            err.to_string(),
            "Backup failed at stage introspection: Introspection failed for public.users: permission denied"
        );
        assert!(!err.to_string().contains("Packaging error"));

        let err = VaultError::run_failed(None, "No database dumps to package");
        assert_eq!(err.stage(), FailureStage::Packaging);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VaultError = io_err.into();
        assert!(matches!(err, VaultError::Io(_)));
        assert_eq!(err.stage(), FailureStage::Packaging);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(FailureStage::Packaging.to_string(), "packaging");
        assert_eq!(FailureStage::Busy.to_string(), "busy");
    }
}
