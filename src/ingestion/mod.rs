//! Ingestion Module - chunked CSV to table loading
//!
//! Handles one run of:
//! - Streaming download and decompression
//! - Incremental CSV parsing into fixed-size batches
//! - Schema inference from the first batch
//! - Table creation under an explicit policy
//! - Transactional per-batch appends

pub mod batch;
pub mod coercion;
pub mod csv_connector;
pub mod loader;
pub mod orchestrator;
pub mod schema_inference;
pub mod source;
pub mod table_builder;

pub use batch::{RecordBatch, Scalar, TypedBatch};
pub use csv_connector::{CsvConnector, DEFAULT_CHUNK_SIZE};
pub use loader::{BatchLoader, BatchProgress};
pub use orchestrator::{run_ingestion, IngestionOrchestrator, RunState};
pub use schema_inference::{ColumnDef, ColumnSchema, SchemaInference, SemanticType};
pub use source::{Compression, SourceLocation};
pub use table_builder::{TableBuilder, TableOutcome, TablePolicy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ingestion result
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestionResult {
    /// Ingestion run ID
    pub run_id: String,

    /// Destination table
    pub table: String,

    /// Number of records ingested
    pub records_ingested: u64,

    /// Number of committed batches
    pub batches_loaded: usize,

    /// What happened to the table; `None` when the source had no rows
    pub table_outcome: Option<TableOutcome>,

    /// Schema the run loaded with
    pub schema: Option<ColumnSchema>,

    /// Status
    pub status: IngestionStatus,

    pub started_at: DateTime<Utc>,

    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum IngestionStatus {
    Success,
    /// The source had a header but no data rows.
    Empty,
}
