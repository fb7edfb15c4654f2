//! SQL generation for dumps
//!
//! This is a narrow code generator, not a SQL library. It produces exactly
//! three statement shapes (`DROP TABLE IF EXISTS ... CASCADE`,
//! `CREATE TABLE`, multi-row `INSERT`) plus the fixed introspection and
//! paging queries the dumper issues.

use std::borrow::Cow;
use std::fmt;

use chrono::SecondsFormat;

use crate::executor::SqlValue;

/// Appended to a field value that was cut at the size ceiling
pub const TRUNCATION_MARKER: &str = "...[TRUNCATED BY BACKUP]";

/// Lists user tables, excluding system schemas
pub const LIST_TABLES_SQL: &str = "SELECT table_schema, table_name \
     FROM information_schema.tables \
     WHERE table_type = 'BASE TABLE' \
     AND table_schema NOT IN ('pg_catalog', 'information_schema') \
     AND table_schema NOT LIKE 'pg_toast%' \
     AND table_schema NOT LIKE 'pg_temp%' \
     ORDER BY table_schema, table_name";

/// Column metadata for one table; `$1` schema, `$2` table
pub const COLUMNS_SQL: &str = "SELECT column_name, data_type, udt_name, is_nullable, \
     character_maximum_length, numeric_precision, numeric_scale \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

/// Primary key columns for one table; `$1` schema, `$2` table
pub const PRIMARY_KEY_SQL: &str = "SELECT kcu.column_name \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
     ON tc.constraint_name = kcu.constraint_name \
     AND tc.table_schema = kcu.table_schema \
     AND tc.table_name = kcu.table_name \
     WHERE tc.constraint_type = 'PRIMARY KEY' \
     AND tc.table_schema = $1 AND tc.table_name = $2 \
     ORDER BY kcu.ordinal_position";

/// Data types the executors decode natively; anything else is read as text
const NATIVE_TYPES: &[&str] = &[
    "boolean",
    "smallint",
    "integer",
    "bigint",
    "real",
    "double precision",
    "numeric",
    "text",
    "character varying",
    "character",
    "uuid",
    "timestamp with time zone",
    "timestamp without time zone",
    "date",
    "time without time zone",
    "json",
    "jsonb",
    "bytea",
];

/// A schema-qualified table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `"schema"."table"`, safe to splice into a statement
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Introspected metadata for one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// `information_schema.columns.data_type`
    pub data_type: String,
    /// Underlying type name, used for arrays and user-defined types
    pub udt_name: Option<String>,
    pub nullable: bool,
    pub max_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
}

impl ColumnInfo {
    /// A nullable column of the given type
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            udt_name: None,
            nullable: true,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_length(mut self, length: i64) -> Self {
        self.max_length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: i64, scale: i64) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    pub fn with_udt(mut self, udt_name: impl Into<String>) -> Self {
        self.udt_name = Some(udt_name.into());
        self
    }

    /// The type as it appears in a column definition
    pub fn type_sql(&self) -> String {
        match self.data_type.as_str() {
            "character varying" | "character" => match self.max_length {
                Some(length) => format!("{}({})", self.data_type, length),
                None => self.data_type.clone(),
            },
            "numeric" => match (self.numeric_precision, self.numeric_scale) {
                (Some(precision), Some(scale)) => format!("numeric({},{})", precision, scale),
                (Some(precision), None) => format!("numeric({})", precision),
                _ => "numeric".to_string(),
            },
            "ARRAY" => match self.udt_name.as_deref() {
                Some(udt) => format!("{}[]", udt.trim_start_matches('_')),
                None => "text[]".to_string(),
            },
            "USER-DEFINED" => match self.udt_name.as_deref() {
                Some(udt) => quote_ident(udt),
                None => "text".to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Whether the executors return this column with its own type
    pub fn is_natively_decoded(&self) -> bool {
        NATIVE_TYPES.contains(&self.data_type.as_str())
    }
}

/// Quote an identifier, doubling embedded double quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Double every single quote
pub fn escape_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Cut `value` to at most `limit` bytes and append [`TRUNCATION_MARKER`]
///
/// A value of exactly `limit` bytes is returned untouched. The cut never
/// splits a UTF-8 sequence.
pub fn truncate_field(value: &str, limit: usize) -> Cow<'_, str> {
    if value.len() <= limit {
        return Cow::Borrowed(value);
    }

    let mut end = limit;
    while !value.is_char_boundary(end) {
        end -= 1;
    }

    Cow::Owned(format!("{}{}", &value[..end], TRUNCATION_MARKER))
}

fn quoted_literal(value: &str, limit: usize) -> String {
    format!("'{}'", escape_string(&truncate_field(value, limit)))
}

/// Render a value as a SQL literal
pub fn render_value(value: &SqlValue, field_limit: usize) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(true) => "TRUE".to_string(),
        SqlValue::Bool(false) => "FALSE".to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) if f.is_finite() => f.to_string(),
        SqlValue::Float(f) if f.is_nan() => "'NaN'".to_string(),
        SqlValue::Float(f) if *f > 0.0 => "'Infinity'".to_string(),
        SqlValue::Float(_) => "'-Infinity'".to_string(),
        SqlValue::Numeric(n) if is_plain_number(n) => n.clone(),
        SqlValue::Numeric(n) => format!("'{}'", escape_string(n)),
        SqlValue::Text(s) => quoted_literal(s, field_limit),
        SqlValue::Timestamp(t) => format!("'{}'", t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        SqlValue::LocalTimestamp(t) => format!("'{}'", t.format("%Y-%m-%dT%H:%M:%S%.f")),
        SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
        SqlValue::Json(v) => quoted_literal(&v.to_string(), field_limit),
        SqlValue::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("'\\x{}'", hex)
        }
    }
}

fn is_plain_number(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
}

/// `DROP TABLE IF EXISTS ... CASCADE;`
pub fn drop_table(table: &TableName) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE;\n", table.quoted())
}

/// `CREATE TABLE` with one line per column and an optional primary key
pub fn create_table(table: &TableName, columns: &[ColumnInfo], primary_key: &[String]) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|column| {
            let mut line = format!("  {} {}", quote_ident(&column.name), column.type_sql());
            if !column.nullable {
                line.push_str(" NOT NULL");
            }
            line
        })
        .collect();

    if !primary_key.is_empty() {
        let key: Vec<String> = primary_key.iter().map(|c| quote_ident(c)).collect();
        lines.push(format!("  PRIMARY KEY ({})", key.join(", ")));
    }

    format!("CREATE TABLE {} (\n{}\n);\n", table.quoted(), lines.join(",\n"))
}

/// Comma-separated, quoted column list
pub fn column_list(columns: &[ColumnInfo]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SELECT COUNT(*)` for one table
pub fn count_rows_sql(table: &TableName) -> String {
    format!("SELECT COUNT(*) AS row_count FROM {}", table.quoted())
}

/// Paged SELECT; `$1` limit, `$2` offset
///
/// Columns without native decoding are cast to text. Rows are ordered by
/// the primary key when there is one so that pages never overlap.
pub fn select_batch_sql(table: &TableName, columns: &[ColumnInfo], primary_key: &[String]) -> String {
    let select_list = columns
        .iter()
        .map(|column| {
            let ident = quote_ident(&column.name);
            if column.is_natively_decoded() {
                ident
            } else {
                format!("{}::text AS {}", ident, ident)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let order_by = if primary_key.is_empty() {
        String::new()
    } else {
        let key: Vec<String> = primary_key.iter().map(|c| quote_ident(c)).collect();
        format!(" ORDER BY {}", key.join(", "))
    };

    format!(
        "SELECT {} FROM {}{} LIMIT $1 OFFSET $2",
        select_list,
        table.quoted(),
        order_by
    )
}

/// Append one multi-row INSERT for `rows` to `out`
pub fn write_insert<'a, I>(out: &mut String, table: &TableName, columns: &[ColumnInfo], rows: I, field_limit: usize)
where
    I: IntoIterator<Item = &'a [SqlValue]>,
{
    out.push_str("INSERT INTO ");
    out.push_str(&table.quoted());
    out.push_str(" (");
    out.push_str(&column_list(columns));
    out.push_str(") VALUES\n");

    for (i, row) in rows.into_iter().enumerate() {
        if i > 0 {
            out.push_str(",\n");
        }
        out.push('(');
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                out.push_str(", ");
            }
            out.push_str(&render_value(value, field_limit));
        }
        out.push(')');
    }

    out.push_str(";\n");
}

/// Rows fetched per page for a table of `row_count` rows
///
/// Large tables use smaller pages to bound memory and result size.
pub fn batch_size_for(row_count: u64) -> u64 {
    match row_count {
        0..=1_000 => 1000,
        1_001..=10_000 => 500,
        10_001..=100_000 => 100,
        _ => 50,
    }
}
