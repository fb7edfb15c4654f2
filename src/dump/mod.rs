//! Streaming SQL dumps
//!
//! A dump is produced table by table and written straight to an async
//! sink, so memory use is bounded by one batch of rows regardless of how
//! large the database is.
//!
//! - [`sql`]: the statement grammar (DROP / CREATE / INSERT) and literal rendering
//! - [`table`]: table enumeration and the per-table dumper
//! - [`writer`]: the whole-database writer with include/exclude filters

pub mod sql;
pub mod table;
pub mod writer;

use serde::{Deserialize, Serialize};

pub use sql::{ColumnInfo, TableName};
pub use table::{enumerate_tables, TableDumper, TableReport, TableStatus};
pub use writer::{DatabaseDumpWriter, DumpSummary, TableFilter};

/// Options for one dump run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    /// Emit INSERT statements for table rows
    #[serde(default = "default_include_data")]
    pub include_data: bool,
    /// Emit schema only; overrides `include_data`
    #[serde(default)]
    pub schema_only: bool,
    /// Only tables matching one of these patterns (substring or regex)
    #[serde(default)]
    pub tables_to_include: Option<Vec<String>>,
    /// Skip tables matching one of these patterns, applied after includes
    #[serde(default)]
    pub tables_to_exclude: Option<Vec<String>>,
}

fn default_include_data() -> bool {
    true
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            include_data: true,
            schema_only: false,
            tables_to_include: None,
            tables_to_exclude: None,
        }
    }
}

impl BackupOptions {
    /// Schema-only dumps
    pub fn schema_only() -> Self {
        Self {
            schema_only: true,
            ..Self::default()
        }
    }

    /// Whether row data is written
    pub fn emits_data(&self) -> bool {
        self.include_data && !self.schema_only
    }
}
