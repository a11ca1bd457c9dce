//! Ingestion Orchestrator - Drives one run from source to table
//!
//! A run walks `NotStarted -> SchemaInferred -> TableReady -> Loading* ->
//! Completed`, or ends in `Failed`. The schema is inferred from the first
//! batch and the table prepared before any batch is loaded.

use std::fmt;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Destination, IngestConfig};
use crate::db::{PostgresTarget, SqliteTarget, TableTarget};
use crate::error::{IngestError, Result};
use crate::ingestion::batch::RecordBatch;
use crate::ingestion::csv_connector::CsvConnector;
use crate::ingestion::loader::BatchLoader;
use crate::ingestion::schema_inference::SchemaInference;
use crate::ingestion::table_builder::TableOutcome;
use crate::ingestion::{IngestionResult, IngestionStatus};

/// Lifecycle of a single run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    NotStarted,
    SchemaInferred,
    TableReady,
    Loading,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    /// Whether `self -> next` is a legal step.
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (*self, next) {
            (from, Failed) => !from.is_terminal(),
            (NotStarted, SchemaInferred) => true,
            // A header with no rows completes without touching the database.
            (NotStarted, Completed) => true,
            (SchemaInferred, TableReady) => true,
            (TableReady, Loading) => true,
            (Loading, Loading) => true,
            (Loading, Completed) => true,
            _ => false,
        }
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.can_advance_to(next) {
            return Err(IngestError::State(format!(
                "illegal transition {} -> {}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::NotStarted => "NOT_STARTED",
            RunState::SchemaInferred => "SCHEMA_INFERRED",
            RunState::TableReady => "TABLE_READY",
            RunState::Loading => "LOADING",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Ingestion Orchestrator - Pulls batches and hands them to a `BatchLoader`
pub struct IngestionOrchestrator {
    schema_inference: SchemaInference,
    run_id: String,
    state: RunState,
}

impl IngestionOrchestrator {
    pub fn new(schema_inference: SchemaInference) -> Self {
        Self {
            schema_inference,
            run_id: Uuid::new_v4().to_string(),
            state: RunState::NotStarted,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run the pipeline to a terminal state.
    ///
    /// On error the state is `Failed` and batches committed so far stay in
    /// the table.
    pub fn run<I, T>(
        &mut self,
        batches: I,
        loader: &mut BatchLoader<T>,
    ) -> Result<IngestionResult>
    where
        I: IntoIterator<Item = Result<RecordBatch>>,
        T: TableTarget,
    {
        if self.state != RunState::NotStarted {
            return Err(IngestError::State(format!(
                "run {} already reached {}",
                self.run_id, self.state
            )));
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        match self.drive(batches, loader) {
            Ok(table_outcome) => {
                self.state.advance(RunState::Completed)?;
                let elapsed_ms = clock.elapsed().as_millis() as u64;
                info!(
                    run_id = %self.run_id,
                    rows = loader.rows_loaded(),
                    batches = loader.batches_loaded(),
                    elapsed_ms,
                    "Data ingestion complete"
                );
                let status = if table_outcome.is_some() {
                    IngestionStatus::Success
                } else {
                    IngestionStatus::Empty
                };
                Ok(IngestionResult {
                    run_id: self.run_id.clone(),
                    table: loader.table().to_string(),
                    records_ingested: loader.rows_loaded(),
                    batches_loaded: loader.batches_loaded(),
                    table_outcome,
                    schema: loader.schema().cloned(),
                    status,
                    started_at,
                    elapsed_ms,
                })
            }
            Err(e) => {
                self.record_failure(&e, loader.rows_loaded(), loader.batches_loaded());
                Err(e)
            }
        }
    }

    /// Move to `Failed` and report what was committed before `err`.
    pub fn record_failure(
        &mut self,
        err: &IngestError,
        rows_committed: u64,
        batches_committed: usize,
    ) {
        if self.state.advance(RunState::Failed).is_err() {
            // Already terminal; the first failure was reported.
            return;
        }
        error!(
            run_id = %self.run_id,
            kind = err.kind(),
            rows_committed,
            batches_committed,
            "Ingestion failed: {}",
            err
        );
    }

    fn drive<I, T>(
        &mut self,
        batches: I,
        loader: &mut BatchLoader<T>,
    ) -> Result<Option<TableOutcome>>
    where
        I: IntoIterator<Item = Result<RecordBatch>>,
        T: TableTarget,
    {
        let mut batches = batches.into_iter();

        let first = match batches.next() {
            Some(batch) => batch?,
            None => {
                warn!(table = loader.table(), "Source has no data rows; nothing to load");
                return Ok(None);
            }
        };

        let schema = self.schema_inference.infer_schema(&first)?;
        self.state.advance(RunState::SchemaInferred)?;
        info!(
            columns = schema.len(),
            schema = %serde_json::to_string(&schema).unwrap_or_default(),
            "Inferred schema from first batch"
        );

        let outcome = loader.prepare(schema)?;
        self.state.advance(RunState::TableReady)?;

        self.state.advance(RunState::Loading)?;
        loader.load(&first)?;
        drop(first);

        for batch in batches {
            let batch = batch?;
            self.state.advance(RunState::Loading)?;
            loader.load(&batch)?;
        }

        Ok(Some(outcome))
    }
}

/// Open the source and destination described by `config` and run to completion.
pub fn run_ingestion(config: &IngestConfig) -> Result<IngestionResult> {
    let inference = SchemaInference::with_pinned_types(config.column_types.clone());
    let mut orchestrator = IngestionOrchestrator::new(inference);
    info!(
        run_id = orchestrator.run_id(),
        source = %config.source_url,
        table = %config.target_table,
        chunk_size = config.chunk_size,
        policy = %config.table_policy,
        "Starting ingestion run"
    );

    let outcome = match &config.destination {
        Destination::Postgres(settings) => PostgresTarget::connect(settings)
            .and_then(|target| run_with_target(&mut orchestrator, config, target)),
        Destination::Sqlite(path) => SqliteTarget::open(path)
            .and_then(|target| run_with_target(&mut orchestrator, config, target)),
    };
    outcome.map_err(|e| {
        // No-op once the run itself has failed.
        orchestrator.record_failure(&e, 0, 0);
        e
    })
}

fn run_with_target<T: TableTarget>(
    orchestrator: &mut IngestionOrchestrator,
    config: &IngestConfig,
    target: T,
) -> Result<IngestionResult> {
    let mut loader = BatchLoader::new(target, config.target_table.clone(), config.table_policy);
    let source = CsvConnector::open(&config.source_url, config.chunk_size, config.delimiter)
        .map_err(|e| {
            orchestrator.record_failure(&e, 0, 0);
            e
        })?;
    orchestrator.run(source, &mut loader)
}
