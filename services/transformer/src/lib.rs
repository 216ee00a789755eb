//! Transformer Service - Builds clean files and the denormalized fact dataset
//!
//! Responsibilities:
//! - Read the sales, features and stores extracts straight from the raw directory
//! - Normalize headers and rename to the clean schema (dates typed)
//! - Persist one clean file per source
//! - Left-join sales with features on (store, date), then with stores on store
//! - Detect join fan-out instead of tolerating it silently
//! - Persist the fact dataset as `full_dataset_clean.csv`
//!
//! Same raw files = same clean files, byte for byte.

pub mod join;

use std::path::Path;

use etl_common::schema::{DeclaredSchema, FEATURES_CLEAN, SALES_CLEAN, STORES_CLEAN};
use etl_common::table::{read_csv, write_csv, WrittenFile};
use etl_common::{clean, sources, AuditLog, EtlConfig, EtlError, Result, Table};

pub use join::{left_join, JoinReport, JoinSpec};

const FEATURES_JOIN: JoinSpec<'static> = JoinSpec {
    right_name: "features",
    keys: &[("store", "store"), ("sale_date", "feature_date")],
    collision_prefix: "feature_",
};

const STORES_JOIN: JoinSpec<'static> = JoinSpec {
    right_name: "stores",
    keys: &[("store", "store")],
    collision_prefix: "store_",
};

#[derive(Debug, Clone, Default)]
pub struct TransformReport {
    /// Clean files in write order; the fact dataset is last
    pub written: Vec<WrittenFile>,
    pub joins: Vec<JoinReport>,
    pub missing: Vec<&'static str>,
}

impl TransformReport {
    pub fn fact_rows(&self) -> usize {
        self.written.last().map(|w| w.rows).unwrap_or(0)
    }

    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .written
            .iter()
            .map(|w| {
                let name = w
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{}={}", name, w.rows)
            })
            .collect();
        if !self.missing.is_empty() {
            parts.push(format!("missing=[{}]", self.missing.join(", ")));
        }
        format!("({})", parts.join(", "))
    }
}

/// Run the transform stage, logging start, completion or failure to `audit`.
#[tracing::instrument(name = "transform", skip_all)]
pub fn run_transform(config: &EtlConfig, audit: &AuditLog) -> Result<TransformReport> {
    audit.info("==== TRANSFORM STEP STARTED ====");
    match transform(config, audit) {
        Ok(report) => {
            audit.info("==== TRANSFORM STEP COMPLETED ====");
            Ok(report)
        }
        Err(e) => {
            audit.error(format!("TRANSFORM ERROR: {}", e));
            Err(e)
        }
    }
}

fn transform(config: &EtlConfig, audit: &AuditLog) -> Result<TransformReport> {
    let mut report = TransformReport::default();

    let sales = read_source(config, audit, sources::TRAIN, SALES_CLEAN, &mut report)?;
    let features = read_source(config, audit, sources::FEATURES, FEATURES_CLEAN, &mut report)?;
    let stores = read_source(config, audit, sources::STORES, STORES_CLEAN, &mut report)?;

    for (table, file_name) in [
        (&sales, clean::SALES),
        (&features, clean::FEATURES),
        (&stores, clean::STORES),
    ] {
        report
            .written
            .push(save(&config.clean_path(file_name), table, audit)?);
    }

    let mut fact = sales;
    for (right, spec) in [(&features, &FEATURES_JOIN), (&stores, &STORES_JOIN)] {
        let (joined, join) = left_join(&fact, right, spec)?;
        audit.info(format!(
            "Joined {}: {} rows -> {} rows ({} unmatched)",
            join.right, join.left_rows, join.output_rows, join.unmatched_left_rows
        ));
        if join.has_fan_out() {
            if config.strict_join {
                return Err(EtlError::JoinFanOut {
                    right: join.right,
                    left_rows: join.left_rows,
                    output_rows: join.output_rows,
                });
            }
            audit.warn(format!(
                "join with {} added {} rows ({} duplicate keys)",
                join.right,
                join.fan_out(),
                join.duplicate_right_keys
            ));
        }
        report.joins.push(join);
        fact = joined;
    }

    report
        .written
        .push(save(&config.clean_path(clean::FULL_DATASET), &fact, audit)?);
    Ok(report)
}

/// A missing file is logged and read as an empty table.
fn read_source(
    config: &EtlConfig,
    audit: &AuditLog,
    file_name: &'static str,
    schema: DeclaredSchema,
    report: &mut TransformReport,
) -> Result<Table> {
    let path = config.raw_path(file_name);
    match read_csv(&path, schema, config.batch_size) {
        Ok(table) => {
            audit.info(format!("Read {} ({} rows)", file_name, table.len()));
            Ok(table)
        }
        Err(e) if e.is_recoverable() => {
            audit.warn(format!("expected file missing: {}", path.display()));
            report.missing.push(file_name);
            Ok(Table::empty(schema.table_schema()))
        }
        Err(e) => Err(e),
    }
}

fn save(path: &Path, table: &Table, audit: &AuditLog) -> Result<WrittenFile> {
    let written = write_csv(path, table)?;
    audit.info(format!(
        "Saved clean file: {} ({} rows, {})",
        written.path.display(),
        written.rows,
        written.content_hash
    ));
    Ok(written)
}

// =============================================================================
// TESTS
// =============================================================================
