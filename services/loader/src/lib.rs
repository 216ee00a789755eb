//! Loader Service - Replaces the analytic tables from the clean files
//!
//! Responsibilities:
//! - Read and validate all four clean files before touching any table
//! - Replace each analytic table in full (no incremental merge)
//! - Log row counts per table
//!
//! Tables are replaced one after another. A failure partway through leaves
//! the earlier tables replaced and the later ones as they were.

use etl_common::schema::{DeclaredSchema, FACT_CLEAN, FEATURES_CLEAN, SALES_CLEAN, STORES_CLEAN};
use etl_common::table::read_csv;
use etl_common::{clean, AuditLog, EtlConfig, Result, Table, TableStore};

/// A clean file and the analytic table it replaces.
#[derive(Debug, Clone, Copy)]
pub struct LoadTarget {
    pub file_name: &'static str,
    pub table: &'static str,
    pub schema: DeclaredSchema,
}

pub const LOAD_TARGETS: [LoadTarget; 4] = [
    LoadTarget {
        file_name: clean::SALES,
        table: "sales_clean",
        schema: SALES_CLEAN,
    },
    LoadTarget {
        file_name: clean::FEATURES,
        table: "features_clean",
        schema: FEATURES_CLEAN,
    },
    LoadTarget {
        file_name: clean::STORES,
        table: "stores_clean",
        schema: STORES_CLEAN,
    },
    LoadTarget {
        file_name: clean::FULL_DATASET,
        table: "fact_sales",
        schema: FACT_CLEAN,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLoad {
    pub table: &'static str,
    pub rows: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<TableLoad>,
}

impl LoadReport {
    pub fn rows_for(&self, table: &str) -> Option<u64> {
        self.loaded.iter().find(|l| l.table == table).map(|l| l.rows)
    }

    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .loaded
            .iter()
            .map(|l| format!("{}={}", l.table, l.rows))
            .collect();
        format!("({})", parts.join(", "))
    }
}

/// Run the load stage, logging start, completion or failure to `audit`.
#[tracing::instrument(name = "load", skip_all)]
pub async fn run_load(
    config: &EtlConfig,
    store: &dyn TableStore,
    audit: &AuditLog,
) -> Result<LoadReport> {
    audit.info("==== LOAD STEP STARTED ====");
    match load(config, store, audit).await {
        Ok(report) => {
            audit.info("==== LOAD STEP COMPLETED ====");
            Ok(report)
        }
        Err(e) => {
            audit.error(format!("LOAD ERROR: {}", e));
            Err(e)
        }
    }
}

async fn load(config: &EtlConfig, store: &dyn TableStore, audit: &AuditLog) -> Result<LoadReport> {
    // Preparation: every file must parse before the first table is dropped.
    let mut prepared: Vec<(&LoadTarget, Table)> = Vec::with_capacity(LOAD_TARGETS.len());
    for target in &LOAD_TARGETS {
        let path = config.clean_path(target.file_name);
        let table = read_csv(&path, target.schema, config.batch_size)?;
        tracing::debug!(file = target.file_name, rows = table.len(), "clean file validated");
        prepared.push((target, table));
    }
    audit.info(format!(
        "Replacing {} analytic tables in {}",
        prepared.len(),
        store.describe()
    ));

    let mut report = LoadReport::default();
    for (target, table) in &prepared {
        let rows = store.replace_table(target.table, table).await?;
        audit.info(format!("Loaded {} ({} rows)", target.table, rows));
        report.loaded.push(TableLoad {
            table: target.table,
            rows,
        });
    }
    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================
