//! PostgreSQL executor backed by sqlx

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row as _, TypeInfo};

use super::{QueryExecutor, Row, SqlValue};
use crate::config::Settings;
use crate::error::{VaultError, VaultResult};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Executes queries on PostgreSQL, one pool per logical database
pub struct PgExecutor {
    pools: HashMap<String, PgPool>,
}

impl PgExecutor {
    /// Build lazily connected pools for every endpoint that has a URL
    ///
    /// No connection is opened until the first query.
    pub fn from_settings(settings: &Settings) -> VaultResult<Self> {
        let mut pools = HashMap::new();

        for endpoint in settings.endpoints() {
            let Some(url) = endpoint.url.as_deref() else {
                tracing::debug!(database = %endpoint.name, "No connection URL configured");
                continue;
            };

            let pool = PgPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(30))
                .connect_lazy(url)
                .map_err(|e| {
                    VaultError::Config(format!(
                        "Invalid connection URL for database '{}': {}",
                        endpoint.name, e
                    ))
                })?;
            pools.insert(endpoint.name.clone(), pool);
        }

        Ok(Self { pools })
    }

    /// Use existing pools keyed by logical database name
    pub fn with_pools(pools: HashMap<String, PgPool>) -> Self {
        Self { pools }
    }

    fn pool(&self, database: &str) -> VaultResult<&PgPool> {
        self.pools.get(database).ok_or_else(|| {
            VaultError::Config(format!(
                "No connection configured for database '{}'",
                database
            ))
        })
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn query(
        &self,
        database: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> VaultResult<Vec<Row>> {
        let pool = self.pool(database)?;

        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, param| bind_param(query, param));

        let rows = query.fetch_all(pool).await?;
        rows.iter().map(decode_row).collect()
    }
}

fn bind_param<'q>(query: PgQuery<'q>, value: &SqlValue) -> PgQuery<'q> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Numeric(s) | SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Timestamp(t) => query.bind(*t),
        SqlValue::LocalTimestamp(t) => query.bind(*t),
        SqlValue::Date(d) => query.bind(*d),
        SqlValue::Time(t) => query.bind(*t),
        SqlValue::Json(v) => query.bind(v.clone()),
        SqlValue::Bytes(b) => query.bind(b.clone()),
    }
}

fn decode_row(row: &PgRow) -> VaultResult<Row> {
    let mut columns = Vec::with_capacity(row.len());

    for column in row.columns() {
        let type_name = column.type_info().name().to_ascii_uppercase();
        let value = decode_value(row, column.ordinal(), &type_name).map_err(|e| {
            VaultError::Query(format!(
                "Failed to decode column '{}' ({}): {}",
                column.name(),
                type_name,
                e
            ))
        })?;
        columns.push((column.name().to_string(), value));
    }

    Ok(Row::new(columns))
}

fn decode_value(row: &PgRow, index: usize, type_name: &str) -> Result<SqlValue, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(SqlValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| SqlValue::Int(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| SqlValue::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(SqlValue::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| SqlValue::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(SqlValue::Float),
        "NUMERIC" => row
            .try_get::<Option<sqlx::types::Decimal>, _>(index)?
            .map(|v| SqlValue::Numeric(v.to_string())),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index)?.map(SqlValue::Text)
        }
        "UUID" => row
            .try_get::<Option<sqlx::types::Uuid>, _>(index)?
            .map(|v| SqlValue::Text(v.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(SqlValue::Timestamp),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(SqlValue::LocalTimestamp),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(SqlValue::Date),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(index)?
            .map(SqlValue::Time),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(SqlValue::Json),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)?
            .map(SqlValue::Bytes),
        other => {
            return Err(sqlx::Error::Decode(
                format!("unsupported column type {}", other).into(),
            ))
        }
    };

    Ok(value.unwrap_or(SqlValue::Null))
}
