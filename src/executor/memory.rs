//! In-process executor backed by in-memory tables
//!
//! Understands exactly the statements the dumper issues: the table listing,
//! column and primary key introspection, row counts and paged selects. Any
//! other statement is rejected. Every statement is recorded so tests can
//! inspect paging behaviour.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{QueryExecutor, Row, SqlValue};
use crate::dump::sql::{self, ColumnInfo, TableName};
use crate::error::{VaultError, VaultResult};

type RowGenerator = Arc<dyn Fn(u64) -> Vec<SqlValue> + Send + Sync>;

#[derive(Clone)]
enum MemoryRows {
    Fixed(Vec<Vec<SqlValue>>),
    Generated { count: u64, generator: RowGenerator },
}

impl MemoryRows {
    fn len(&self) -> u64 {
        match self {
            Self::Fixed(rows) => rows.len() as u64,
            Self::Generated { count, .. } => *count,
        }
    }

    fn row(&self, index: u64) -> Vec<SqlValue> {
        match self {
            Self::Fixed(rows) => rows[index as usize].clone(),
            Self::Generated { generator, .. } => generator(index),
        }
    }
}

/// A table served by [`MemoryExecutor`]
#[derive(Clone)]
pub struct MemoryTable {
    name: TableName,
    columns: Vec<ColumnInfo>,
    primary_key: Vec<String>,
    rows: MemoryRows,
    fail_columns: Option<String>,
    fail_count: Option<String>,
    fail_offset: Option<(u64, String)>,
}

impl MemoryTable {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: TableName::new(schema, name),
            columns: Vec::new(),
            primary_key: Vec::new(),
            rows: MemoryRows::Fixed(Vec::new()),
            fail_columns: None,
            fail_count: None,
            fail_offset: None,
        }
    }

    pub fn column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Serve these rows, in order
    pub fn rows(mut self, rows: Vec<Vec<SqlValue>>) -> Self {
        self.rows = MemoryRows::Fixed(rows);
        self
    }

    /// Serve `count` rows produced on demand by `generator(index)`
    pub fn generated_rows<F>(mut self, count: u64, generator: F) -> Self
    where
        F: Fn(u64) -> Vec<SqlValue> + Send + Sync + 'static,
    {
        self.rows = MemoryRows::Generated {
            count,
            generator: Arc::new(generator),
        };
        self
    }

    /// Column introspection for this table fails
    pub fn fail_on_columns(mut self, message: impl Into<String>) -> Self {
        self.fail_columns = Some(message.into());
        self
    }

    /// The row count query for this table fails
    pub fn fail_on_count(mut self, message: impl Into<String>) -> Self {
        self.fail_count = Some(message.into());
        self
    }

    /// Paged selects at or beyond `offset` fail
    pub fn fail_on_offset(mut self, offset: u64, message: impl Into<String>) -> Self {
        self.fail_offset = Some((offset, message.into()));
        self
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A statement seen by [`MemoryExecutor`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    pub database: String,
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Clone, Default)]
struct MemoryDatabase {
    tables: Vec<MemoryTable>,
    fail_listing: Option<String>,
}

/// Executor over fixed in-memory databases
#[derive(Default)]
pub struct MemoryExecutor {
    databases: HashMap<String, MemoryDatabase>,
    log: Mutex<Vec<RecordedQuery>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.databases.entry(database.into()).or_default();
        self
    }

    /// Add a table to `database`, creating the database if needed
    pub fn with_table(mut self, database: impl Into<String>, table: MemoryTable) -> Self {
        self.databases
            .entry(database.into())
            .or_default()
            .tables
            .push(table);
        self
    }

    /// Listing tables in `database` fails
    pub fn fail_listing(mut self, database: impl Into<String>, message: impl Into<String>) -> Self {
        self.databases.entry(database.into()).or_default().fail_listing = Some(message.into());
        self
    }

    /// Every statement executed so far
    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The LIMIT of every paged select issued against `database`
    pub fn select_limits(&self, database: &str) -> Vec<i64> {
        self.queries()
            .into_iter()
            .filter(|q| q.database == database && q.sql.ends_with("LIMIT $1 OFFSET $2"))
            .filter_map(|q| q.params.first().and_then(SqlValue::as_i64))
            .collect()
    }

    fn record(&self, database: &str, sql: &str, params: &[SqlValue]) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedQuery {
                database: database.to_string(),
                sql: sql.to_string(),
                params: params.to_vec(),
            });
    }

    fn answer(&self, database: &str, sql: &str, params: &[SqlValue]) -> VaultResult<Vec<Row>> {
        let db = self
            .databases
            .get(database)
            .ok_or_else(|| VaultError::Query(format!("database \"{}\" does not exist", database)))?;

        if sql == sql::LIST_TABLES_SQL {
            if let Some(message) = &db.fail_listing {
                return Err(VaultError::Query(message.clone()));
            }
            return Ok(db
                .tables
                .iter()
                .map(|t| {
                    Row::new(vec![
                        ("table_schema".to_string(), SqlValue::from(t.name.schema.as_str())),
                        ("table_name".to_string(), SqlValue::from(t.name.name.as_str())),
                    ])
                })
                .collect());
        }

        if sql == sql::COLUMNS_SQL {
            let Some(table) = lookup_by_params(db, params) else {
                return Ok(Vec::new());
            };
            if let Some(message) = &table.fail_columns {
                return Err(VaultError::Query(message.clone()));
            }
            return Ok(table.columns.iter().map(column_row).collect());
        }

        if sql == sql::PRIMARY_KEY_SQL {
            let Some(table) = lookup_by_params(db, params) else {
                return Ok(Vec::new());
            };
            return Ok(table
                .primary_key
                .iter()
                .map(|c| Row::new(vec![("column_name".to_string(), SqlValue::from(c.as_str()))]))
                .collect());
        }

        let table = db
            .tables
            .iter()
            .find(|t| references_table(sql, &t.name))
            .ok_or_else(|| VaultError::Query(format!("relation in \"{}\" does not exist", sql)))?;

        if sql.starts_with("SELECT COUNT(*)") {
            if let Some(message) = &table.fail_count {
                return Err(VaultError::Query(message.clone()));
            }
            return Ok(vec![Row::new(vec![(
                "row_count".to_string(),
                SqlValue::Int(table.rows.len() as i64),
            )])]);
        }

        if sql.starts_with("SELECT ") && sql.ends_with("LIMIT $1 OFFSET $2") {
            let limit = param_u64(params, 0)?;
            let offset = param_u64(params, 1)?;
            if let Some((fail_at, message)) = &table.fail_offset {
                if offset >= *fail_at {
                    return Err(VaultError::Query(message.clone()));
                }
            }

            let names = table.column_names();
            let end = (offset + limit).min(table.rows.len());
            return Ok((offset..end)
                .map(|i| Row::new(names.iter().cloned().zip(table.rows.row(i)).collect()))
                .collect());
        }

        Err(VaultError::Query(format!("unsupported statement: {}", sql)))
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn query(
        &self,
        database: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> VaultResult<Vec<Row>> {
        self.record(database, sql, params);
        self.answer(database, sql, params)
    }
}

fn lookup_by_params<'a>(db: &'a MemoryDatabase, params: &[SqlValue]) -> Option<&'a MemoryTable> {
    let schema = params.first().and_then(SqlValue::as_str)?;
    let name = params.get(1).and_then(SqlValue::as_str)?;
    db.tables
        .iter()
        .find(|t| t.name.schema == schema && t.name.name == name)
}

fn references_table(sql: &str, table: &TableName) -> bool {
    let from = format!(" FROM {}", table.quoted());
    sql.match_indices(&from).any(|(i, _)| {
        let rest = &sql[i + from.len()..];
        rest.is_empty() || rest.starts_with(' ')
    })
}

fn param_u64(params: &[SqlValue], index: usize) -> VaultResult<u64> {
    params
        .get(index)
        .and_then(SqlValue::as_i64)
        .map(|v| v.max(0) as u64)
        .ok_or_else(|| VaultError::Query(format!("missing integer parameter ${}", index + 1)))
}

fn column_row(column: &ColumnInfo) -> Row {
    Row::new(vec![
        ("column_name".to_string(), SqlValue::from(column.name.as_str())),
        ("data_type".to_string(), SqlValue::from(column.data_type.as_str())),
        ("udt_name".to_string(), SqlValue::from(column.udt_name.clone())),
        (
            "is_nullable".to_string(),
            SqlValue::from(if column.nullable { "YES" } else { "NO" }),
        ),
        ("character_maximum_length".to_string(), SqlValue::from(column.max_length)),
        ("numeric_precision".to_string(), SqlValue::from(column.numeric_precision)),
        ("numeric_scale".to_string(), SqlValue::from(column.numeric_scale)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> MemoryExecutor {
        MemoryExecutor::new().with_table(
            "app",
            MemoryTable::new("public", "items")
                .column(ColumnInfo::new("id", "bigint").not_null())
                .primary_key(&["id"])
                .generated_rows(25, |i| vec![SqlValue::Int(i as i64)]),
        )
    }

    #[tokio::test]
    async fn test_count_and_page() {
        let executor = executor();
        let table = TableName::new("public", "items");

        let count = executor
            .query("app", &sql::count_rows_sql(&table), &[])
            .await
            .unwrap();
        assert_eq!(count[0].get_i64("row_count"), Some(25));

        let columns = vec![ColumnInfo::new("id", "bigint")];
        let select = sql::select_batch_sql(&table, &columns, &["id".to_string()]);
        let rows = executor
            .query("app", &select, &[SqlValue::Int(10), SqlValue::Int(20)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].get_i64("id"), Some(20));

        assert_eq!(executor.select_limits("app"), vec![10]);
        assert_eq!(executor.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_database_and_statement() {
        let executor = executor();
        assert!(executor.query("nope", sql::LIST_TABLES_SQL, &[]).await.is_err());
        assert!(executor.query("app", "DELETE FROM x", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_prefix_table_names_do_not_collide() {
        let executor = executor().with_table(
            "app",
            MemoryTable::new("public", "items_archive")
                .column(ColumnInfo::new("id", "bigint"))
                .rows(vec![vec![SqlValue::Int(1)]]),
        );
        let archive = TableName::new("public", "items_archive");

        let count = executor
            .query("app", &sql::count_rows_sql(&archive), &[])
            .await
            .unwrap();
        assert_eq!(count[0].get_i64("row_count"), Some(1));
    }
}
