//! PostgreSQL destination using the synchronous `postgres` client
//!
//! Each batch is written with one binary `COPY ... FROM STDIN` inside its own
//! transaction.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use chrono::NaiveTime;
use postgres::binary_copy::BinaryCopyInWriter;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{Client, Config, NoTls};
use tracing::{debug, info};

use crate::db::{Dialect, TableTarget};
use crate::error::{IngestError, Result};
use crate::ingestion::batch::Scalar;
use crate::ingestion::coercion::whole_number;
use crate::ingestion::schema_inference::ColumnSchema;
use crate::ingestion::table_builder::quote_ident;

pub const DEFAULT_PG_PORT: u16 = 5432;

/// Connection parameters for the destination database.
#[derive(Clone)]
pub struct PgSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub connect_timeout: Duration,
}

impl fmt::Debug for PgSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgSettings")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl PgSettings {
    fn to_config(&self) -> Config {
        let mut config = Config::new();
        config
            .user(&self.user)
            .password(&self.password)
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .connect_timeout(self.connect_timeout)
            .application_name("trip-ingest");
        config
    }
}

pub fn copy_in_sql(table: &str, schema: &ColumnSchema) -> String {
    format!(
        "COPY {} ({}) FROM STDIN (FORMAT binary)",
        quote_ident(table),
        quoted_columns(schema)
    )
}

/// Statement whose result description carries the table's real column types.
pub fn column_types_sql(table: &str, schema: &ColumnSchema) -> String {
    format!(
        "SELECT {} FROM {} LIMIT 0",
        quoted_columns(schema),
        quote_ident(table)
    )
}

fn quoted_columns(schema: &ColumnSchema) -> String {
    schema
        .names()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_text(ty: &Type) -> bool {
    [Type::TEXT, Type::VARCHAR, Type::BPCHAR, Type::NAME].contains(ty)
}

fn mismatch(value: &Scalar, ty: &Type) -> Box<dyn StdError + Sync + Send> {
    format!("cannot store {:?} in a column of type {}", value, ty).into()
}

/// Encodes a cell for whatever type the destination column really has.
///
/// Integers widen to floats and any value can land in a text column. A float
/// only narrows to an integer column when it is whole. Everything else is
/// refused.
impl ToSql for Scalar {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        if is_text(ty) && !matches!(self, Scalar::Null | Scalar::Text(_)) {
            return self.to_string().to_sql(ty, out);
        }
        match self {
            Scalar::Null => Ok(IsNull::Yes),
            Scalar::Int(v) => {
                if *ty == Type::INT8 {
                    v.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            Scalar::Float(v) => {
                if *ty == Type::FLOAT8 {
                    v.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if [Type::INT8, Type::INT4, Type::INT2].contains(ty) {
                    match whole_number(*v) {
                        Some(whole) => Scalar::Int(whole).to_sql(ty, out),
                        None => Err(mismatch(self, ty)),
                    }
                } else {
                    Err(mismatch(self, ty))
                }
            }
            Scalar::Timestamp(v) => {
                if *ty == Type::TIMESTAMP {
                    v.to_sql(ty, out)
                } else if *ty == Type::TIMESTAMPTZ {
                    v.and_utc().to_sql(ty, out)
                } else if *ty == Type::DATE && v.time() == NaiveTime::MIN {
                    v.date().to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            Scalar::Bool(v) => {
                if *ty == Type::BOOL {
                    v.to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
            Scalar::Text(v) => {
                if is_text(ty) {
                    v.to_sql(ty, out)
                } else {
                    Err(mismatch(self, ty))
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// PostgreSQL session owned by one run. Dropping it closes the connection.
pub struct PostgresTarget {
    client: Client,
    // Column types of the table last appended to.
    resolved: Option<(String, Vec<Type>)>,
}

impl PostgresTarget {
    pub fn connect(settings: &PgSettings) -> Result<Self> {
        info!(
            host = %settings.host,
            port = settings.port,
            dbname = %settings.dbname,
            "Connecting to PostgreSQL"
        );
        let client = settings.to_config().connect(NoTls).map_err(|e| {
            IngestError::Connection(format!(
                "cannot connect to {}:{}/{}: {}",
                settings.host, settings.port, settings.dbname, e
            ))
        })?;
        Ok(Self {
            client,
            resolved: None,
        })
    }

    /// Types the server reports for `schema`'s columns of `table`.
    ///
    /// A table created by an earlier run or another tool keeps its own types;
    /// a column it lacks fails here as a `LoadError`.
    pub fn column_types(&mut self, table: &str, schema: &ColumnSchema) -> Result<Vec<Type>> {
        if let Some((name, types)) = &self.resolved {
            if name == table && types.len() == schema.len() {
                return Ok(types.clone());
            }
        }
        let statement = self.client.prepare(&column_types_sql(table, schema))?;
        let types: Vec<Type> = statement
            .columns()
            .iter()
            .map(|c| c.type_().clone())
            .collect();
        debug!(table, types = ?types, "Resolved destination column types");
        self.resolved = Some((table.to_string(), types.clone()));
        Ok(types)
    }
}

impl TableTarget for PostgresTarget {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn table_exists(&mut self, table: &str) -> Result<bool> {
        let row = self.client.query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
            &[&table],
        )?;
        Ok(row.get::<_, bool>(0))
    }

    fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        debug!(sql, "Executing DDL");
        self.resolved = None;
        self.client.batch_execute(sql)?;
        Ok(())
    }

    fn append_rows(
        &mut self,
        table: &str,
        schema: &ColumnSchema,
        rows: &[Vec<Scalar>],
    ) -> Result<u64> {
        let types = self.column_types(table, schema)?;
        let statement = copy_in_sql(table, schema);
        debug!(statement = %statement, rows = rows.len(), "Copying batch");

        let mut tx = self.client.transaction()?;
        let written = {
            let sink = tx.copy_in(statement.as_str())?;
            let mut writer = BinaryCopyInWriter::new(sink, &types);
            for row in rows {
                let values: Vec<&(dyn ToSql + Sync)> =
                    row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
                writer.write(&values)?;
            }
            writer.finish()?
        };
        tx.commit()?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::schema_inference::{ColumnDef, SemanticType};
    use chrono::NaiveDate;

    #[test]
    fn test_copy_statement() {
        let schema = ColumnSchema::new(vec![
            ColumnDef::new("VendorID", SemanticType::Integer),
            ColumnDef::new("total_amount", SemanticType::Float),
        ]);
        assert_eq!(
            copy_in_sql("trips", &schema),
            "COPY \"trips\" (\"VendorID\", \"total_amount\") FROM STDIN (FORMAT binary)"
        );
    }

    #[test]
    fn test_column_type_lookup_statement() {
        let schema = ColumnSchema::new(vec![
            ColumnDef::new("id", SemanticType::Integer),
            ColumnDef::new("fare", SemanticType::Float),
        ]);
        assert_eq!(
            column_types_sql("pre", &schema),
            "SELECT \"id\", \"fare\" FROM \"pre\" LIMIT 0"
        );
    }

    fn encode(value: &Scalar, ty: &Type) -> std::result::Result<Vec<u8>, String> {
        let mut buf = BytesMut::new();
        match value.to_sql_checked(ty, &mut buf) {
            Ok(IsNull::No) => Ok(buf.to_vec()),
            Ok(IsNull::Yes) => Ok(Vec::new()),
            Err(e) => Err(e.to_string()),
        }
    }

    #[test]
    fn test_scalar_encoding_follows_column_type() {
        assert_eq!(encode(&Scalar::Int(42), &Type::INT8).unwrap(), 42i64.to_be_bytes());
        assert_eq!(encode(&Scalar::Null, &Type::INT8).unwrap(), Vec::<u8>::new());

        // An integer landing in a float column is widened, never reinterpreted.
        assert_eq!(encode(&Scalar::Int(2), &Type::FLOAT8).unwrap(), 2.0f64.to_be_bytes());
        assert_eq!(encode(&Scalar::Int(2), &Type::FLOAT4).unwrap(), 2.0f32.to_be_bytes());
        assert_eq!(encode(&Scalar::Int(7), &Type::INT4).unwrap(), 7i32.to_be_bytes());
        assert!(encode(&Scalar::Int(1 << 40), &Type::INT4).is_err());

        assert_eq!(encode(&Scalar::Float(3.0), &Type::INT8).unwrap(), 3i64.to_be_bytes());
        assert!(encode(&Scalar::Float(2.5), &Type::INT8).is_err());

        assert_eq!(encode(&Scalar::Int(5), &Type::TEXT).unwrap(), b"5".to_vec());
        assert_eq!(encode(&Scalar::Bool(true), &Type::VARCHAR).unwrap(), b"true".to_vec());
        assert!(encode(&Scalar::Text("abc".into()), &Type::INT8).is_err());
        assert!(encode(&Scalar::Bool(true), &Type::INT8).is_err());
        assert!(encode(&Scalar::Int(1), &Type::NUMERIC).is_err());
    }

    #[test]
    fn test_timestamp_encoding() {
        let midnight = NaiveDate::from_ymd_opt(2021, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let ts = Scalar::Timestamp(midnight);
        assert_eq!(
            encode(&ts, &Type::TIMESTAMP).unwrap(),
            encode(&ts, &Type::TIMESTAMPTZ).unwrap()
        );
        assert_eq!(encode(&ts, &Type::DATE).unwrap().len(), 4);

        let later = Scalar::Timestamp(midnight + chrono::Duration::minutes(30));
        assert!(encode(&later, &Type::DATE).is_err());
        assert!(encode(&later, &Type::INT8).is_err());
    }

    #[test]
    fn test_settings_debug_redacts_password() {
        let settings = PgSettings {
            user: "root".into(),
            password: "hunter2".into(),
            host: "localhost".into(),
            port: DEFAULT_PG_PORT,
            dbname: "ny_taxi".into(),
            connect_timeout: Duration::from_secs(5),
        };
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("ny_taxi"));
    }
}
