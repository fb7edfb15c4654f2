//! Query execution against named databases
//!
//! The backup engine never owns a connection pool. It talks to databases
//! through the [`QueryExecutor`] trait, which runs one parameterized
//! statement against a named database and returns the rows in order.
//!
//! Two implementations ship with the crate:
//!
//! - [`PgExecutor`]: PostgreSQL through sqlx, one lazily connected pool per
//!   configured database
//! - [`MemoryExecutor`]: answers the dump statements from in-memory tables,
//!   used by the test suite

use async_trait::async_trait;

use crate::error::VaultResult;

pub mod memory;
pub mod postgres;
mod value;

pub use memory::{MemoryExecutor, MemoryTable};
pub use postgres::PgExecutor;
pub use value::{Row, SqlValue};

/// Runs parameterized SQL against a named database
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `sql` with positional `params` (`$1`, `$2`, ...) on `database`
    async fn query(&self, database: &str, sql: &str, params: &[SqlValue])
        -> VaultResult<Vec<Row>>;
}
