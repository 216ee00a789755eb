//! Loader binary - runs the load stage on its own.
//!
//! Usage:
//!   cargo run --bin loader -- --clean-dir data/clean --db-config config/db_config.json

use anyhow::{Context, Result};
use clap::Parser;
use etl_common::{AuditLog, CommonArgs, Stores};
use loader::run_load;

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Replaces the analytic tables from the clean files")]
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

    println!("=== Retail Sales Loader ===");
    println!("Clean files: {}", config.clean_dir.display());

    let audit = AuditLog::open(&config.log_file).context("Failed to open audit log")?;
    let stores = Stores::open(&config)
        .await
        .context("Failed to connect to analytic store")?;
    println!("Analytic store: {}", stores.analytic.describe());

    let report = run_load(&config, stores.analytic.as_ref(), &audit)
        .await
        .context("Load failed")?;

    println!("\n=== Load Summary ===");
    for load in &report.loaded {
        println!("  {}: {} rows", load.table, load.rows);
    }

    Ok(())
}
