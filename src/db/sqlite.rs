//! SQLite destination for local runs.

use std::path::Path;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, ToSql};
use tracing::{debug, info};

use crate::db::{Dialect, TableTarget};
use crate::error::{IngestError, Result};
use crate::ingestion::batch::Scalar;
use crate::ingestion::schema_inference::ColumnSchema;
use crate::ingestion::table_builder::quote_ident;

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Scalar::Null => ToSqlOutput::Owned(Value::Null),
            Scalar::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Scalar::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Scalar::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Scalar::Timestamp(v) => ToSqlOutput::Owned(Value::Text(v.to_string())),
            Scalar::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
        })
    }
}

pub fn insert_sql(table: &str, schema: &ColumnSchema) -> String {
    let columns = schema
        .names()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=schema.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns,
        placeholders
    )
}

/// SQLite session owned by one run.
pub struct SqliteTarget {
    conn: Connection,
}

impl SqliteTarget {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening SQLite database");
        let conn = Connection::open(path).map_err(|e| {
            IngestError::Connection(format!("cannot open {}: {}", path.display(), e))
        })?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            IngestError::Connection(format!("cannot open in-memory database: {}", e))
        })?;
        Ok(Self { conn })
    }

    /// Underlying connection, for inspection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl TableTarget for SqliteTarget {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        debug!(sql, "Executing DDL");
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn append_rows(
        &mut self,
        table: &str,
        schema: &ColumnSchema,
        rows: &[Vec<Scalar>],
    ) -> Result<u64> {
        let sql = insert_sql(table, schema);
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(rows.len() as u64)
    }
}
