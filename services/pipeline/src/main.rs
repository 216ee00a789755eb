//! etl-pipeline - runs extract, transform and load in sequence.
//!
//! Usage:
//!   cargo run --bin etl-pipeline -- --db-config config/db_config.json
//!
//!   # Entirely on the local filesystem:
//!   cargo run --bin etl-pipeline -- --store csv --raw-dir data/raw
//!
//! Exits nonzero when any stage fails.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use etl_common::{AuditLog, CommonArgs, Stores};
use etl_pipeline::{Pipeline, StageOutcome, PIPELINE_FAILED};

#[derive(Parser, Debug)]
#[command(name = "etl-pipeline", about = "Runs the retail sales ETL pipeline")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    etl_common::logging::init_tracing();
    let args = Args::parse();
    let config = args.common.into_config().context("Invalid configuration")?;

    println!("=== Retail Sales ETL Pipeline ===");
    let audit = AuditLog::open(&config.log_file).context("Failed to open audit log")?;
    println!("Audit log: {}", audit.path().display());

    let stores = match Stores::open(&config).await {
        Ok(stores) => stores,
        Err(e) => {
            audit.error(format!("ERROR: {}", e));
            audit.error(PIPELINE_FAILED);
            return Err(e).context("Failed to connect to table store");
        }
    };
    println!("Staging: {}", stores.staging.describe());
    println!("Analytic: {}", stores.analytic.describe());

    let pipeline = Pipeline::standard(Arc::new(config), &stores, audit);
    let run = pipeline.run().await;

    println!("\n=== Run {} ===", run.run_id);
    for record in &run.stages {
        let status = match &record.outcome {
            StageOutcome::Succeeded { summary } => format!("✓ {}", summary),
            StageOutcome::Failed { reason } => format!("✗ {}", reason),
        };
        println!(
            "  {:<10} {:>8.2}s  {}",
            record.kind.name(),
            record.elapsed.as_secs_f64(),
            status
        );
    }
    println!("Final state: {}", run.state);

    if let Some(failed) = run.failed_stage() {
        anyhow::bail!("pipeline run {} failed in {} stage", run.run_id, failed.kind);
    }
    Ok(())
}
