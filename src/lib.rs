//! Chunked ingestion of gzip-compressed CSV trip records into a database table.
//!
//! The pipeline is strictly sequential: a [`CsvConnector`] yields one
//! [`RecordBatch`] at a time, the first batch fixes the [`ColumnSchema`], and a
//! [`BatchLoader`] appends each batch to the destination in its own
//! transaction.

pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;

pub use config::{CliArgs, Destination, IngestConfig};
pub use db::{PgSettings, PostgresTarget, SqliteTarget, TableTarget};
pub use error::{IngestError, Result};
pub use ingestion::{
    run_ingestion, BatchLoader, ColumnSchema, CsvConnector, IngestionOrchestrator,
    IngestionResult, IngestionStatus, RecordBatch, RunState, SchemaInference, SemanticType,
    TablePolicy,
};
