//! Batch Loader - Appends coerced batches to the destination table

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::TableTarget;
use crate::error::{IngestError, Result};
use crate::ingestion::batch::RecordBatch;
use crate::ingestion::coercion::coerce_batch;
use crate::ingestion::schema_inference::ColumnSchema;
use crate::ingestion::table_builder::{TableBuilder, TableOutcome, TablePolicy};

/// Progress after one committed batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_index: usize,
    pub batch_rows: u64,
    pub total_rows: u64,
    pub elapsed_ms: u128,
}

/// Owns the database session for one run.
///
/// `prepare` must run once, with the run's schema, before any `load`.
pub struct BatchLoader<T: TableTarget> {
    target: T,
    table: String,
    builder: TableBuilder,
    schema: Option<ColumnSchema>,
    rows_loaded: u64,
    batches_loaded: usize,
    started: Instant,
}

impl<T: TableTarget> BatchLoader<T> {
    pub fn new(target: T, table: impl Into<String>, policy: TablePolicy) -> Self {
        Self {
            target,
            table: table.into(),
            builder: TableBuilder::new(policy),
            schema: None,
            rows_loaded: 0,
            batches_loaded: 0,
            started: Instant::now(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> Option<&ColumnSchema> {
        self.schema.as_ref()
    }

    pub fn rows_loaded(&self) -> u64 {
        self.rows_loaded
    }

    pub fn batches_loaded(&self) -> usize {
        self.batches_loaded
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Release the session.
    pub fn into_target(self) -> T {
        self.target
    }

    /// Make the table ready for `schema`. Runs once per loader.
    pub fn prepare(&mut self, schema: ColumnSchema) -> Result<TableOutcome> {
        if self.schema.is_some() {
            return Err(IngestError::State(format!(
                "table '{}' was already prepared for this run",
                self.table
            )));
        }
        let outcome = self.builder.ensure_table(&mut self.target, &self.table, &schema)?;
        self.schema = Some(schema);
        Ok(outcome)
    }

    /// Coerce `batch` to the run's schema and append it in one transaction.
    pub fn load(&mut self, batch: &RecordBatch) -> Result<BatchProgress> {
        let schema = self.schema.as_ref().ok_or_else(|| {
            IngestError::State(format!(
                "batch {} arrived before table '{}' was prepared",
                batch.index(),
                self.table
            ))
        })?;

        let typed = coerce_batch(schema, batch)?;
        let written = self.target.append_rows(&self.table, schema, &typed.rows)?;

        self.rows_loaded += written;
        self.batches_loaded += 1;
        let progress = BatchProgress {
            batch_index: batch.index(),
            batch_rows: written,
            total_rows: self.rows_loaded,
            elapsed_ms: self.started.elapsed().as_millis(),
        };
        info!(
            batch = progress.batch_index,
            first_row = batch.row_offset(),
            rows = progress.batch_rows,
            total_rows = progress.total_rows,
            elapsed_ms = progress.elapsed_ms as u64,
            "Inserted batch {}: {} rows ({} total)",
            progress.batch_index,
            progress.batch_rows,
            progress.total_rows
        );
        Ok(progress)
    }
}
