//! Table enumeration and per-table dumps

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::sql::{self, ColumnInfo, TableName};
use super::BackupOptions;
use crate::error::{VaultError, VaultResult};
use crate::executor::{QueryExecutor, Row, SqlValue};

/// Tables above this size get periodic progress logging
const PROGRESS_ROW_THRESHOLD: u64 = 10_000;

/// Log progress every this many batches
const PROGRESS_BATCH_INTERVAL: u64 = 10;

/// List user tables in `database`, excluding system schemas
pub async fn enumerate_tables(
    executor: &dyn QueryExecutor,
    database: &str,
) -> VaultResult<Vec<TableName>> {
    let rows = executor
        .query(database, sql::LIST_TABLES_SQL, &[])
        .await
        .map_err(|e| VaultError::Query(format!("Failed to list tables in {}: {}", database, e)))?;

    rows.iter()
        .map(|row| {
            match (row.get_str("table_schema"), row.get_str("table_name")) {
                (Some(schema), Some(name)) => Ok(TableName::new(schema, name)),
                _ => Err(VaultError::Query(format!(
                    "Table listing for {} returned a row without schema or name",
                    database
                ))),
            }
        })
        .collect()
}

/// Outcome for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    /// Schema (and data, if requested) written
    Dumped,
    /// Introspection found no columns
    NotFound,
    /// Introspection or export failed; an error comment was written instead
    Failed(String),
}

/// What the dumper wrote for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: TableName,
    pub status: TableStatus,
    pub columns: usize,
    pub row_count: u64,
    pub rows_written: u64,
    pub batch_size: Option<u64>,
}

impl TableReport {
    fn new(table: &TableName) -> Self {
        Self {
            table: table.clone(),
            status: TableStatus::Dumped,
            columns: 0,
            row_count: 0,
            rows_written: 0,
            batch_size: None,
        }
    }

    pub fn is_dumped(&self) -> bool {
        self.status == TableStatus::Dumped
    }
}

/// Writes the schema and data for single tables of one database
pub struct TableDumper<'a> {
    executor: &'a dyn QueryExecutor,
    database: &'a str,
    options: &'a BackupOptions,
    field_limit: usize,
}

impl<'a> TableDumper<'a> {
    pub fn new(
        executor: &'a dyn QueryExecutor,
        database: &'a str,
        options: &'a BackupOptions,
        field_limit: usize,
    ) -> Self {
        Self {
            executor,
            database,
            options,
            field_limit,
        }
    }

    /// Dump one table to `out`
    ///
    /// Introspection and export failures are written to `out` as a comment
    /// block and reported in the returned [`TableReport`]; only a failure to
    /// write to `out` itself is returned as an error.
    pub async fn dump<W>(&self, table: &TableName, out: &mut W) -> VaultResult<TableReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        emit(out, &format!("\n--\n-- Table: {}\n--\n\n", table)).await?;

        let mut report = TableReport::new(table);
        match self.dump_table(table, out, &mut report).await {
            Ok(()) => Ok(report),
            Err(err @ (VaultError::Introspection { .. } | VaultError::DataExport { .. })) => {
                tracing::warn!(
                    database = %self.database,
                    table = %table,
                    stage = %err.stage(),
                    rows_written = report.rows_written,
                    error = %err,
                    "Table backup failed, continuing with next table"
                );
                emit(out, &failure_comment(table, &err)).await?;
                report.status = TableStatus::Failed(err.to_string());
                Ok(report)
            }
            Err(err) => Err(err),
        }
    }

    async fn dump_table<W>(
        &self,
        table: &TableName,
        out: &mut W,
        report: &mut TableReport,
    ) -> VaultResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let columns = self.columns(table).await?;
        if columns.is_empty() {
            emit(
                out,
                &format!("-- Table {} not found or has no columns, skipped\n", table),
            )
            .await?;
            report.status = TableStatus::NotFound;
            return Ok(());
        }
        report.columns = columns.len();

        let primary_key = self.primary_key(table).await?;

        emit(out, &sql::drop_table(table)).await?;
        emit(out, &sql::create_table(table, &columns, &primary_key)).await?;
        emit(out, "\n").await?;

        if !self.options.emits_data() {
            return Ok(());
        }

        self.dump_rows(table, &columns, &primary_key, out, report).await
    }

    async fn dump_rows<W>(
        &self,
        table: &TableName,
        columns: &[ColumnInfo],
        primary_key: &[String],
        out: &mut W,
        report: &mut TableReport,
    ) -> VaultResult<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let row_count = self.row_count(table).await?;
        report.row_count = row_count;

        if row_count == 0 {
            emit(out, &format!("-- Table {} is empty\n", table)).await?;
            return Ok(());
        }

        let batch_size = sql::batch_size_for(row_count);
        report.batch_size = Some(batch_size);
        let total_batches = row_count.div_ceil(batch_size);
        let select = sql::select_batch_sql(table, columns, primary_key);

        tracing::debug!(
            database = %self.database,
            table = %table,
            rows = row_count,
            batch_size,
            "Exporting table data"
        );

        let mut offset = 0u64;
        let mut batch_index = 0u64;
        while offset < row_count {
            let rows = self
                .executor
                .query(
                    self.database,
                    &select,
                    &[SqlValue::Int(batch_size as i64), SqlValue::Int(offset as i64)],
                )
                .await
                .map_err(|e| {
                    VaultError::data_export(
                        table.to_string(),
                        format!("batch at offset {} failed: {}", offset, e),
                    )
                })?;

            if rows.is_empty() {
                tracing::warn!(
                    table = %table,
                    offset,
                    expected = row_count,
                    "Table shrank during export"
                );
                break;
            }

            // Rows added after the count are not part of this snapshot
            let take = rows.len().min((row_count - offset) as usize);
            let batch = &rows[..take];
            for row in batch {
                if row.len() != columns.len() {
                    return Err(VaultError::data_export(
                        table.to_string(),
                        format!(
                            "expected {} columns per row, got {}",
                            columns.len(),
                            row.len()
                        ),
                    ));
                }
            }

            let values: Vec<Vec<SqlValue>> = batch.iter().map(row_values).collect();
            let mut statement = String::new();
            sql::write_insert(
                &mut statement,
                table,
                columns,
                values.iter().map(Vec::as_slice),
                self.field_limit,
            );
            emit(out, &statement).await?;

            offset += batch_size;
            batch_index += 1;
            report.rows_written += take as u64;

            if row_count > PROGRESS_ROW_THRESHOLD && batch_index % PROGRESS_BATCH_INTERVAL == 0 {
                let percent = report.rows_written as f64 * 100.0 / row_count as f64;
                tracing::info!(
                    database = %self.database,
                    table = %table,
                    rows_written = report.rows_written,
                    rows_total = row_count,
                    batch = batch_index,
                    batches = total_batches,
                    "Table export {:.1}% complete",
                    percent
                );
            }
        }

        emit(out, "\n").await?;
        Ok(())
    }

    async fn columns(&self, table: &TableName) -> VaultResult<Vec<ColumnInfo>> {
        let rows = self
            .executor
            .query(
                self.database,
                sql::COLUMNS_SQL,
                &[
                    SqlValue::from(table.schema.as_str()),
                    SqlValue::from(table.name.as_str()),
                ],
            )
            .await
            .map_err(|e| VaultError::introspection(table.to_string(), e))?;

        rows.iter()
            .map(|row| {
                column_from_row(row).ok_or_else(|| {
                    VaultError::introspection(table.to_string(), "column row without name or type")
                })
            })
            .collect()
    }

    async fn primary_key(&self, table: &TableName) -> VaultResult<Vec<String>> {
        let rows = self
            .executor
            .query(
                self.database,
                sql::PRIMARY_KEY_SQL,
                &[
                    SqlValue::from(table.schema.as_str()),
                    SqlValue::from(table.name.as_str()),
                ],
            )
            .await
            .map_err(|e| VaultError::introspection(table.to_string(), e))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get_str("column_name").map(str::to_string))
            .collect())
    }

    async fn row_count(&self, table: &TableName) -> VaultResult<u64> {
        let rows = self
            .executor
            .query(self.database, &sql::count_rows_sql(table), &[])
            .await
            .map_err(|e| VaultError::data_export(table.to_string(), e))?;

        rows.first()
            .and_then(|row| row.get_i64("row_count"))
            .map(|count| count.max(0) as u64)
            .ok_or_else(|| VaultError::data_export(table.to_string(), "row count query returned no rows"))
    }
}

fn column_from_row(row: &Row) -> Option<ColumnInfo> {
    Some(ColumnInfo {
        name: row.get_str("column_name")?.to_string(),
        data_type: row.get_str("data_type")?.to_string(),
        udt_name: row.get_str("udt_name").map(str::to_string),
        nullable: row
            .get_str("is_nullable")
            .map_or(true, |v| v.eq_ignore_ascii_case("YES")),
        max_length: row.get_i64("character_maximum_length"),
        numeric_precision: row.get_i64("numeric_precision"),
        numeric_scale: row.get_i64("numeric_scale"),
    })
}

fn row_values(row: &Row) -> Vec<SqlValue> {
    row.values().cloned().collect()
}

fn failure_comment(table: &TableName, err: &VaultError) -> String {
    let message = err.to_string().replace('\n', " ");
    format!(
        "-- ERROR: backup of table {} failed ({})\n-- {}\n-- Continuing with remaining tables\n\n",
        table,
        err.stage(),
        message
    )
}

pub(crate) async fn emit<W>(out: &mut W, text: &str) -> VaultResult<()>
where
    W: AsyncWrite + Unpin + Send,
{
    out.write_all(text.as_bytes())
        .await
        .map_err(|e| VaultError::Io(format!("Failed to write dump output: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{MemoryExecutor, MemoryTable};
    use std::sync::{Arc, Mutex};

    fn users_table(rows: u64) -> MemoryTable {
        MemoryTable::new("public", "users")
            .column(ColumnInfo::new("id", "integer").not_null())
            .column(ColumnInfo::new("name", "text"))
            .primary_key(&["id"])
            .generated_rows(rows, |i| {
                vec![SqlValue::Int(i as i64 + 1), SqlValue::Text(format!("user-{}", i + 1))]
            })
    }

    async fn dump_to_string(
        executor: &MemoryExecutor,
        table: &TableName,
        options: &BackupOptions,
    ) -> (TableReport, String) {
        let mut out: Vec<u8> = Vec::new();
        let dumper = TableDumper::new(executor, "app", options, 1024);
        let report = dumper.dump(table, &mut out).await.unwrap();
        (report, String::from_utf8(out).unwrap())
    }

    fn count_value_rows(dump: &str) -> usize {
        dump.lines().filter(|line| line.starts_with('(')).count()
    }

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLog {
        fn lines_containing(&self, needle: &str) -> usize {
            let bytes = self.0.lock().unwrap();
            String::from_utf8_lossy(&bytes)
                .lines()
                .filter(|line| line.contains(needle))
                .count()
        }
    }

    /// Dump a generated table and count the progress lines it logs
    async fn progress_lines(rows: u64) -> usize {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let executor = MemoryExecutor::new().with_table("app", users_table(rows));
        let table = TableName::new("public", "users");
        let (report, _) = dump_to_string(&executor, &table, &BackupOptions::default()).await;
        assert_eq!(report.rows_written, rows);

        log.lines_containing("% complete")
    }

    #[tokio::test]
    async fn test_progress_every_ten_batches_for_large_tables() {
        // 25,000 rows at batch size 100 is 250 batches
        assert_eq!(progress_lines(25_000).await, 25);
        // 10,001 rows at batch size 100 is 101 batches
        assert_eq!(progress_lines(10_001).await, 10);
    }

    #[tokio::test]
    async fn test_no_progress_for_small_tables() {
        assert_eq!(progress_lines(10_000).await, 0);
        assert_eq!(progress_lines(500).await, 0);
    }

    #[tokio::test]
    async fn test_enumerate_tables() {
        let executor = MemoryExecutor::new()
            .with_table("app", MemoryTable::new("public", "orders").column(ColumnInfo::new("id", "integer")))
            .with_table("app", users_table(1));

        let tables = enumerate_tables(&executor, "app").await.unwrap();
        assert_eq!(
            tables,
            vec![TableName::new("public", "orders"), TableName::new("public", "users")]
        );
    }

    #[tokio::test]
    async fn test_schema_block_column_count() {
        let executor = MemoryExecutor::new().with_table("app", users_table(3));
        let table = TableName::new("public", "users");

        let (report, dump) = dump_to_string(&executor, &table, &BackupOptions::schema_only()).await;

        assert!(report.is_dumped());
        assert_eq!(report.columns, 2);
        assert_eq!(dump.matches("CREATE TABLE").count(), 1);
        assert!(dump.contains("DROP TABLE IF EXISTS \"public\".\"users\" CASCADE;"));
        assert!(!dump.contains("INSERT INTO"));

        let create = dump.split("CREATE TABLE").nth(1).unwrap();
        let body = create.split(");").next().unwrap();
        let column_lines = body
            .lines()
            .filter(|l| l.starts_with("  \"") && !l.contains("PRIMARY KEY"))
            .count();
        assert_eq!(column_lines, 2);
    }

    #[tokio::test]
    async fn test_rows_emitted_match_count() {
        let executor = MemoryExecutor::new().with_table("app", users_table(2_345));
        let table = TableName::new("public", "users");

        let (report, dump) = dump_to_string(&executor, &table, &BackupOptions::default()).await;

        assert_eq!(report.batch_size, Some(500));
        assert_eq!(report.rows_written, 2_345);
        assert_eq!(count_value_rows(&dump), 2_345);
        assert_eq!(dump.matches("INSERT INTO").count(), 5);
        assert!(dump.contains("(1, 'user-1')"));
        assert!(dump.contains("(2345, 'user-2345')"));
    }

    #[tokio::test]
    async fn test_empty_table_comment() {
        let executor = MemoryExecutor::new().with_table("app", users_table(0));
        let table = TableName::new("public", "users");

        let (report, dump) = dump_to_string(&executor, &table, &BackupOptions::default()).await;

        assert!(report.is_dumped());
        assert!(dump.contains("-- Table public.users is empty"));
        assert!(!dump.contains("INSERT INTO"));
    }

    #[tokio::test]
    async fn test_missing_table_comment() {
        let executor = MemoryExecutor::new().with_table("app", users_table(1));
        let table = TableName::new("public", "ghosts");

        let (report, dump) = dump_to_string(&executor, &table, &BackupOptions::default()).await;

        assert_eq!(report.status, TableStatus::NotFound);
        assert!(dump.contains("not found or has no columns"));
        assert!(!dump.contains("CREATE TABLE"));
    }

    #[tokio::test]
    async fn test_introspection_failure_is_local() {
        let executor =
            MemoryExecutor::new().with_table("app", users_table(5).fail_on_columns("permission denied"));
        let table = TableName::new("public", "users");

        let (report, dump) = dump_to_string(&executor, &table, &BackupOptions::default()).await;

        assert!(matches!(report.status, TableStatus::Failed(ref msg) if msg.contains("permission denied")));
        assert!(dump.contains("-- ERROR: backup of table public.users failed (introspection)"));
    }

    #[tokio::test]
    async fn test_export_failure_keeps_valid_prefix() {
        let executor = MemoryExecutor::new()
            .with_table("app", users_table(2_500).fail_on_offset(1_000, "connection reset"));
        let table = TableName::new("public", "users");

        let (report, dump) = dump_to_string(&executor, &table, &BackupOptions::default()).await;

        assert!(matches!(report.status, TableStatus::Failed(_)));
        assert_eq!(report.rows_written, 1_000);
        assert_eq!(count_value_rows(&dump), 1_000);
        assert!(dump.contains("failed (export)"));
    }

    #[tokio::test]
    async fn test_oversized_field_truncated() {
        let table = MemoryTable::new("public", "notes")
            .column(ColumnInfo::new("body", "text"))
            .rows(vec![vec![SqlValue::Text("x".repeat(2_000))]]);
        let executor = MemoryExecutor::new().with_table("app", table);

        let (_, dump) = dump_to_string(&executor, &TableName::new("public", "notes"), &BackupOptions::default()).await;

        assert!(dump.contains(&format!("{}{}'", "x".repeat(1024), sql::TRUNCATION_MARKER)));
        assert!(!dump.contains(&"x".repeat(1025)));
    }
}
