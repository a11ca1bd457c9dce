//! Invocation parameters.
//!
//! Every flag can also come from an environment variable; `main` loads a
//! `.env` file before parsing.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::db::connection::{PgSettings, DEFAULT_PG_PORT};
use crate::error::{IngestError, Result};
use crate::ingestion::csv_connector::DEFAULT_CHUNK_SIZE;
use crate::ingestion::schema_inference::SemanticType;
use crate::ingestion::table_builder::TablePolicy;

pub const DEFAULT_SOURCE_URL: &str =
    "https://github.com/DataTalksClub/nyc-tlc-data/releases/download/yellow/yellow_tripdata_2021-01.csv.gz";

#[derive(Parser, Debug, Clone)]
#[command(name = "trip-ingest")]
#[command(about = "Ingest a gzip-compressed CSV file into a database table, one batch at a time")]
pub struct CliArgs {
    /// Postgres username
    #[arg(long, env = "PG_USER", required_unless_present = "sqlite_path")]
    pub pg_user: Option<String>,

    /// Postgres password
    #[arg(long, env = "PG_PASS", hide_env_values = true, required_unless_present = "sqlite_path")]
    pub pg_pass: Option<String>,

    /// Postgres host
    #[arg(long, env = "PG_HOST", required_unless_present = "sqlite_path")]
    pub pg_host: Option<String>,

    /// Postgres port
    #[arg(long, env = "PG_PORT", default_value_t = DEFAULT_PG_PORT)]
    pub pg_port: u16,

    /// Postgres database name
    #[arg(long, env = "PG_DB", required_unless_present = "sqlite_path")]
    pub pg_db: Option<String>,

    /// Target table name
    #[arg(long, env = "TARGET_TABLE")]
    pub target_table: String,

    /// URL or path of the (gzip-compressed) CSV file
    #[arg(long, env = "SOURCE_URL", default_value = DEFAULT_SOURCE_URL)]
    pub url: String,

    /// Rows per batch
    #[arg(long, env = "CHUNKSIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunksize: usize,

    /// What to do when the target table already exists
    #[arg(long, env = "TABLE_POLICY", default_value_t = TablePolicy::CreateIfAbsent)]
    pub table_policy: TablePolicy,

    /// Pin a column's type instead of inferring it, as NAME=TYPE (repeatable)
    #[arg(long = "column-type", value_name = "NAME=TYPE")]
    pub column_types: Vec<String>,

    /// Field delimiter
    #[arg(long, env = "CSV_DELIMITER", default_value_t = ',')]
    pub delimiter: char,

    /// Load into this SQLite file instead of Postgres
    #[arg(long, env = "SQLITE_PATH")]
    pub sqlite_path: Option<PathBuf>,

    /// Postgres connect timeout in seconds
    #[arg(long, env = "PG_CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    pub connect_timeout_secs: u64,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub summary_json: bool,
}

/// Where batches are written.
#[derive(Clone, Debug)]
pub enum Destination {
    Postgres(PgSettings),
    Sqlite(PathBuf),
}

/// Validated configuration for one run.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub destination: Destination,
    pub target_table: String,
    pub source_url: String,
    pub chunk_size: usize,
    pub table_policy: TablePolicy,
    pub column_types: BTreeMap<String, SemanticType>,
    pub delimiter: u8,
}

impl IngestConfig {
    /// Local run into a SQLite file with default settings.
    pub fn sqlite(
        path: impl Into<PathBuf>,
        table: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            destination: Destination::Sqlite(path.into()),
            target_table: table.into(),
            source_url: source.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            table_policy: TablePolicy::default(),
            column_types: BTreeMap::new(),
            delimiter: b',',
        }
    }
}

impl TryFrom<CliArgs> for IngestConfig {
    type Error = IngestError;

    fn try_from(args: CliArgs) -> Result<Self> {
        if args.chunksize == 0 {
            return Err(IngestError::Config("--chunksize must be positive".to_string()));
        }
        let target_table = args.target_table.trim().to_string();
        if target_table.is_empty() {
            return Err(IngestError::Config("--target-table must not be empty".to_string()));
        }
        if !args.delimiter.is_ascii() {
            return Err(IngestError::Config(format!(
                "delimiter {:?} is not a single-byte character",
                args.delimiter
            )));
        }

        let column_types = parse_column_types(&args.column_types)?;

        let destination = match args.sqlite_path {
            Some(path) => Destination::Sqlite(path),
            None => Destination::Postgres(PgSettings {
                user: required(args.pg_user, "--pg-user")?,
                password: required(args.pg_pass, "--pg-pass")?,
                host: required(args.pg_host, "--pg-host")?,
                port: args.pg_port,
                dbname: required(args.pg_db, "--pg-db")?,
                connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            }),
        };

        Ok(Self {
            destination,
            target_table,
            source_url: args.url,
            chunk_size: args.chunksize,
            table_policy: args.table_policy,
            column_types,
            delimiter: args.delimiter as u8,
        })
    }
}

fn required(value: Option<String>, flag: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IngestError::Config(format!("{} is required", flag)))
}

/// Parse repeated `NAME=TYPE` pins. A later pin for the same name wins.
pub fn parse_column_types(pins: &[String]) -> Result<BTreeMap<String, SemanticType>> {
    let mut pinned = BTreeMap::new();
    for pin in pins {
        let (name, ty) = pin.split_once('=').ok_or_else(|| {
            IngestError::Config(format!("column type '{}' is not NAME=TYPE", pin))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(IngestError::Config(format!(
                "column type '{}' has an empty name",
                pin
            )));
        }
        let ty: SemanticType = ty.parse().map_err(IngestError::Config)?;
        pinned.insert(name.to_string(), ty);
    }
    Ok(pinned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> CliArgs {
        let args = std::iter::once("trip-ingest").chain(line.split_whitespace());
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(
            "--pg-user root --pg-pass root --pg-host localhost --pg-db ny_taxi \
             --target-table yellow_taxi_data",
        );
        let config = IngestConfig::try_from(args).unwrap();
        assert_eq!(config.chunk_size, 100_000);
        assert_eq!(config.source_url, DEFAULT_SOURCE_URL);
        assert_eq!(config.table_policy, TablePolicy::CreateIfAbsent);
        assert_eq!(config.delimiter, b',');
        match config.destination {
            Destination::Postgres(pg) => {
                assert_eq!(pg.port, 5432);
                assert_eq!(pg.dbname, "ny_taxi");
            }
            other => panic!("unexpected destination {:?}", other),
        }
    }

    #[test]
    fn test_sqlite_makes_postgres_flags_optional() {
        let args = parse(
            "--sqlite-path /tmp/trips.db --target-table trips \
             --table-policy truncate-and-create \
             --column-type VendorID=integer --column-type store_and_fwd_flag=boolean",
        );
        let config = IngestConfig::try_from(args).unwrap();
        assert!(matches!(config.destination, Destination::Sqlite(_)));
        assert_eq!(config.table_policy, TablePolicy::TruncateAndCreate);
        assert_eq!(
            config.column_types.get("store_and_fwd_flag"),
            Some(&SemanticType::Boolean)
        );
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let args = parse("--sqlite-path x.db --target-table t --chunksize 0");
        assert!(matches!(IngestConfig::try_from(args), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_bad_column_pins() {
        assert!(parse_column_types(&["VendorID".to_string()]).is_err());
        assert!(parse_column_types(&["=integer".to_string()]).is_err());
        assert!(parse_column_types(&["VendorID=money".to_string()]).is_err());
    }
}
