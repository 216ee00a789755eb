//! Transformer binary - runs the transform stage on its own.
//!
//! Usage:
//!   cargo run --bin transformer -- --raw-dir data/raw --clean-dir data/clean
//!
//!   # Fail instead of warning when a join duplicates sales rows:
//!   cargo run --bin transformer -- --strict-join

use anyhow::{Context, Result};
use clap::Parser;
use etl_common::{AuditLog, CommonArgs};
use transformer::run_transform;

#[derive(Parser, Debug)]
#[command(name = "transformer", about = "Builds clean files and the fact dataset")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    etl_common::logging::init_tracing();
    let args = Args::parse();
    let config = args.common.into_config().context("Invalid configuration")?;

    println!("=== Retail Sales Transformer ===");
    println!("Raw files: {}", config.raw_dir.display());
    println!("Clean files: {}", config.clean_dir.display());

    let audit = AuditLog::open(&config.log_file).context("Failed to open audit log")?;
    let report = run_transform(&config, &audit).context("Transform failed")?;

    println!("\n=== Transform Summary ===");
    for file in &report.written {
        println!(
            "  {}: {} rows ({})",
            file.path.display(),
            file.rows,
            file.content_hash
        );
    }
    for join in &report.joins {
        println!(
            "  join {}: {} -> {} rows, {} unmatched, {} duplicate keys",
            join.right,
            join.left_rows,
            join.output_rows,
            join.unmatched_left_rows,
            join.duplicate_right_keys
        );
    }
    for missing in &report.missing {
        println!("  ⚠ {} missing - treated as empty", missing);
    }

    Ok(())
}
