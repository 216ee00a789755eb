//! Extractor binary - runs the extract stage on its own.
//!
//! Usage:
//!   cargo run --bin extractor -- --raw-dir data/raw --db-config config/db_config.json
//!
//!   # Against a directory of CSV tables instead of Postgres:
//!   cargo run --bin extractor -- --store csv --staging-dir data/staging

use anyhow::{Context, Result};
use clap::Parser;
use etl_common::{AuditLog, CommonArgs, Stores};
use extractor::run_extract;

#[derive(Parser, Debug)]
#[command(name = "extractor", about = "Loads raw sales extracts into staging tables")]
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

    println!("=== Retail Sales Extractor ===");
    println!("Raw files: {}", config.raw_dir.display());

    let audit = AuditLog::open(&config.log_file).context("Failed to open audit log")?;
    let stores = Stores::open(&config)
        .await
        .context("Failed to connect to staging store")?;
    println!("Staging: {}", stores.staging.describe());

    let report = run_extract(&config, stores.staging.as_ref(), &audit)
        .await
        .context("Extract failed")?;

    println!("\n=== Extract Summary ===");
    for load in &report.loaded {
        println!(
            "  {} -> {}: {} rows in {} batch(es)",
            load.file_name, load.table, load.rows, load.batches
        );
    }
    for missing in &report.missing {
        println!("  ⚠ {} missing - skipped", missing);
    }
    println!("Total rows staged: {}", report.total_rows());

    Ok(())
}
