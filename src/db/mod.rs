//! Database module for the destination table
//!
//! Ingestion talks to the database only through `TableTarget`. PostgreSQL is
//! the production backend; SQLite serves local runs and tests.

pub mod connection;
pub mod sqlite;

pub use connection::{PgSettings, PostgresTarget};
pub use sqlite::SqliteTarget;

use crate::error::Result;
use crate::ingestion::batch::Scalar;
use crate::ingestion::schema_inference::ColumnSchema;

/// SQL dialect spoken by a target, used to spell DDL types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

/// A database session that can hold the destination table.
pub trait TableTarget {
    fn dialect(&self) -> Dialect;

    /// Whether `table` exists in the session's default schema.
    fn table_exists(&mut self, table: &str) -> Result<bool>;

    fn execute_ddl(&mut self, sql: &str) -> Result<()>;

    /// Append `rows` in a single transaction and return the number written.
    ///
    /// Either every row commits or none does.
    fn append_rows(
        &mut self,
        table: &str,
        schema: &ColumnSchema,
        rows: &[Vec<Scalar>],
    ) -> Result<u64>;
}

impl<T: TableTarget + ?Sized> TableTarget for &mut T {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        (**self).table_exists(table)
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        (**self).execute_ddl(sql)
    }

    fn append_rows(
        &mut self,
        table: &str,
        schema: &ColumnSchema,
        rows: &[Vec<Scalar>],
    ) -> Result<u64> {
        (**self).append_rows(table, schema, rows)
    }
}
