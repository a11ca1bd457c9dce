use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trip_ingest::{run_ingestion, CliArgs, IngestConfig, IngestError};

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = err
                .downcast_ref::<IngestError>()
                .map(IngestError::kind)
                .unwrap_or("Error");
            eprintln!("error [{}]: {:#}", kind, err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> Result<()> {
    let summary_json = args.summary_json;
    let config = IngestConfig::try_from(args)?;
    let table = config.target_table.clone();

    let result = run_ingestion(&config)
        .with_context(|| format!("ingestion into table '{}' failed", table))?;

    info!(
        run_id = %result.run_id,
        rows = result.records_ingested,
        batches = result.batches_loaded,
        elapsed_ms = result.elapsed_ms,
        "Loaded {} rows into {} in {} batches",
        result.records_ingested,
        result.table,
        result.batches_loaded
    );
    if summary_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}
