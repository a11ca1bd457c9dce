//! Table Builder - Creates the destination table from an inferred schema
//!
//! What happens when the table already exists is an explicit `TablePolicy`
//! chosen by the caller.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{Dialect, TableTarget};
use crate::error::{IngestError, Result};
use crate::ingestion::schema_inference::{ColumnSchema, SemanticType};

/// Behaviour when the destination table is already present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TablePolicy {
    /// Create the table if absent, otherwise append to it.
    #[default]
    CreateIfAbsent,
    /// Refuse to touch an existing table.
    FailIfExists,
    /// Drop an existing table and recreate it from the schema.
    TruncateAndCreate,
}

impl fmt::Display for TablePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TablePolicy::CreateIfAbsent => "create-if-absent",
            TablePolicy::FailIfExists => "fail-if-exists",
            TablePolicy::TruncateAndCreate => "truncate-and-create",
        };
        f.write_str(name)
    }
}

impl FromStr for TablePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create-if-absent" | "append" => Ok(TablePolicy::CreateIfAbsent),
            "fail-if-exists" | "fail" => Ok(TablePolicy::FailIfExists),
            "truncate-and-create" | "replace" => Ok(TablePolicy::TruncateAndCreate),
            other => Err(format!(
                "unknown table policy '{}' (expected create-if-absent, fail-if-exists or truncate-and-create)",
                other
            )),
        }
    }
}

/// What `TableBuilder::ensure_table` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableOutcome {
    Created,
    Existing,
    Replaced,
}

/// Quote an identifier, doubling embedded quotes. Case is preserved.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column type spelled for a dialect.
pub fn sql_type(dialect: Dialect, ty: SemanticType) -> &'static str {
    match (dialect, ty) {
        (Dialect::Postgres, SemanticType::Integer) => "BIGINT",
        (Dialect::Postgres, SemanticType::Float) => "DOUBLE PRECISION",
        (Dialect::Postgres, SemanticType::Text) => "TEXT",
        (Dialect::Postgres, SemanticType::Timestamp) => "TIMESTAMP",
        (Dialect::Postgres, SemanticType::Boolean) => "BOOLEAN",
        (Dialect::Sqlite, SemanticType::Integer) => "INTEGER",
        (Dialect::Sqlite, SemanticType::Float) => "REAL",
        (Dialect::Sqlite, SemanticType::Text) => "TEXT",
        (Dialect::Sqlite, SemanticType::Timestamp) => "TIMESTAMP",
        (Dialect::Sqlite, SemanticType::Boolean) => "BOOLEAN",
    }
}

pub fn create_table_sql(dialect: Dialect, table: &str, schema: &ColumnSchema) -> String {
    let columns = schema
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(dialect, c.data_type)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_ident(table), columns)
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

/// Table Builder - Materializes a `ColumnSchema` according to a `TablePolicy`
#[derive(Clone, Debug, Default)]
pub struct TableBuilder {
    pub policy: TablePolicy,
}

impl TableBuilder {
    pub fn new(policy: TablePolicy) -> Self {
        Self { policy }
    }

    /// Make `table` ready to receive rows shaped like `schema`.
    pub fn ensure_table<T: TableTarget + ?Sized>(
        &self,
        target: &mut T,
        table: &str,
        schema: &ColumnSchema,
    ) -> Result<TableOutcome> {
        if schema.is_empty() {
            return Err(IngestError::SchemaMismatch(
                "cannot create a table without columns".to_string(),
            ));
        }

        let exists = target.table_exists(table)?;
        let create = create_table_sql(target.dialect(), table, schema);

        match (exists, self.policy) {
            (false, _) => {
                target.execute_ddl(&create)?;
                info!(table, columns = schema.len(), "Table {} created", table);
                Ok(TableOutcome::Created)
            }
            (true, TablePolicy::CreateIfAbsent) => {
                warn!(table, "Table {} already exists, appending to it", table);
                Ok(TableOutcome::Existing)
            }
            (true, TablePolicy::FailIfExists) => Err(IngestError::Load(format!(
                "table '{}' already exists and the policy is {}",
                table, self.policy
            ))),
            (true, TablePolicy::TruncateAndCreate) => {
                target.execute_ddl(&drop_table_sql(table))?;
                target.execute_ddl(&create)?;
                info!(table, columns = schema.len(), "Table {} replaced", table);
                Ok(TableOutcome::Replaced)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::schema_inference::ColumnDef;

    fn schema() -> ColumnSchema {
        ColumnSchema::new(vec![
            ColumnDef::new("VendorID", SemanticType::Integer),
            ColumnDef::new("tpep_pickup_datetime", SemanticType::Timestamp),
            ColumnDef::new("fare_amount", SemanticType::Float),
            ColumnDef::new("store_and_fwd_flag", SemanticType::Text),
        ])
    }

    #[test]
    fn test_postgres_ddl_preserves_order_and_case() {
        let sql = create_table_sql(Dialect::Postgres, "yellow_taxi_trips", &schema());
        assert_eq!(
            sql,
            "CREATE TABLE \"yellow_taxi_trips\" (\"VendorID\" BIGINT, \
             \"tpep_pickup_datetime\" TIMESTAMP, \"fare_amount\" DOUBLE PRECISION, \
             \"store_and_fwd_flag\" TEXT)"
        );
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(drop_table_sql("t"), "DROP TABLE IF EXISTS \"t\"");
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("create-if-absent".parse::<TablePolicy>().unwrap(), TablePolicy::CreateIfAbsent);
        assert_eq!("replace".parse::<TablePolicy>().unwrap(), TablePolicy::TruncateAndCreate);
        assert_eq!("FAIL-IF-EXISTS".parse::<TablePolicy>().unwrap(), TablePolicy::FailIfExists);
        assert!("upsert".parse::<TablePolicy>().is_err());
        assert_eq!(TablePolicy::default().to_string(), "create-if-absent");
    }
}
