//! Whole-database dump writer

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use super::sql::TableName;
use super::table::{emit, enumerate_tables, TableDumper, TableReport};
use super::BackupOptions;
use crate::error::{VaultError, VaultResult};
use crate::executor::QueryExecutor;
use crate::{TOOL_NAME, TOOL_VERSION};

/// One include or exclude pattern
#[derive(Debug, Clone)]
struct TablePattern {
    raw: String,
    regex: Option<Regex>,
}

impl TablePattern {
    fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            regex: Regex::new(raw).ok(),
        }
    }

    fn matches(&self, qualified: &str) -> bool {
        qualified.contains(&self.raw) || self.regex.as_ref().is_some_and(|r| r.is_match(qualified))
    }
}

/// Include/exclude filter over `schema.table` names
///
/// A pattern matches when it is a substring of the qualified name or, if it
/// compiles as a regex, when the regex matches. Excludes win over includes.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: Option<Vec<TablePattern>>,
    exclude: Vec<TablePattern>,
}

impl TableFilter {
    pub fn from_options(options: &BackupOptions) -> Self {
        let compile = |patterns: &Vec<String>| -> Vec<TablePattern> {
            patterns.iter().map(|p| TablePattern::new(p)).collect()
        };

        Self {
            include: options
                .tables_to_include
                .as_ref()
                .filter(|p| !p.is_empty())
                .map(compile),
            exclude: options
                .tables_to_exclude
                .as_ref()
                .map(compile)
                .unwrap_or_default(),
        }
    }

    pub fn allows(&self, table: &TableName) -> bool {
        let qualified = table.to_string();
        let included = self
            .include
            .as_ref()
            .map_or(true, |patterns| patterns.iter().any(|p| p.matches(&qualified)));
        included && !self.exclude.iter().any(|p| p.matches(&qualified))
    }
}

/// Result of dumping one database
#[derive(Debug, Clone)]
pub struct DumpSummary {
    pub database: String,
    /// Output file, when written through [`DatabaseDumpWriter::dump_to_file`]
    pub path: Option<PathBuf>,
    pub tables: Vec<TableReport>,
    pub duration: Duration,
}

impl DumpSummary {
    /// Tables whose schema (and data, if requested) were written
    pub fn tables_backed_up(&self) -> usize {
        self.tables.iter().filter(|t| t.is_dumped()).count()
    }

    pub fn rows_written(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_written).sum()
    }
}

/// Dumps every selected table of a database to one stream
#[derive(Clone)]
pub struct DatabaseDumpWriter {
    executor: Arc<dyn QueryExecutor>,
    field_limit: usize,
}

impl DatabaseDumpWriter {
    pub fn new(executor: Arc<dyn QueryExecutor>, field_limit: usize) -> Self {
        Self {
            executor,
            field_limit,
        }
    }

    /// Write a complete dump of `database` to `out`
    ///
    /// Fails only if the table listing fails or `out` cannot be written;
    /// per-table problems end up as comments in the dump.
    pub async fn write_database<W>(
        &self,
        database: &str,
        out: &mut W,
        options: &BackupOptions,
    ) -> VaultResult<DumpSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();

        let tables = enumerate_tables(self.executor.as_ref(), database).await?;
        let filter = TableFilter::from_options(options);
        let selected: Vec<TableName> = tables.into_iter().filter(|t| filter.allows(t)).collect();

        tracing::info!(
            database,
            tables = selected.len(),
            include_data = options.emits_data(),
            "Starting database dump"
        );

        emit(out, &header(database, options)).await?;

        let dumper = TableDumper::new(self.executor.as_ref(), database, options, self.field_limit);
        let mut reports = Vec::with_capacity(selected.len());
        for table in &selected {
            reports.push(dumper.dump(table, out).await?);
        }

        let duration = started.elapsed();
        let summary = DumpSummary {
            database: database.to_string(),
            path: None,
            tables: reports,
            duration,
        };

        emit(
            out,
            &format!(
                "\n-- Backup completed in {:.2}s\n-- Tables backed up: {} of {}\n",
                duration.as_secs_f64(),
                summary.tables_backed_up(),
                selected.len()
            ),
        )
        .await?;
        out.flush()
            .await
            .map_err(|e| VaultError::Io(format!("Failed to flush dump output: {}", e)))?;

        tracing::info!(
            database,
            tables = summary.tables_backed_up(),
            rows = summary.rows_written(),
            duration_ms = duration.as_millis() as u64,
            "Database dump complete"
        );

        Ok(summary)
    }

    /// Write a dump of `database` to a new file at `path`
    pub async fn dump_to_file(
        &self,
        database: &str,
        path: &Path,
        options: &BackupOptions,
    ) -> VaultResult<DumpSummary> {
        let file = tokio::fs::File::create(path).await.map_err(|e| {
            VaultError::Io(format!("Failed to create dump file {}: {}", path.display(), e))
        })?;

        let mut writer = BufWriter::new(file);
        let mut summary = self.write_database(database, &mut writer, options).await?;
        writer
            .shutdown()
            .await
            .map_err(|e| VaultError::Io(format!("Failed to close dump file: {}", e)))?;

        summary.path = Some(path.to_path_buf());
        Ok(summary)
    }
}

fn header(database: &str, options: &BackupOptions) -> String {
    format!(
        "--\n-- Database backup: {}\n-- Generated: {}\n-- Tool: {} {}\n-- Data included: {}\n--\n",
        database,
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        TOOL_NAME,
        TOOL_VERSION,
        if options.emits_data() { "yes" } else { "no (schema only)" }
    )
}
