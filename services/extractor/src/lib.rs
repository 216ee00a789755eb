//! Extractor Service - Loads raw point-of-sale extracts into staging tables
//!
//! Responsibilities:
//! - Locate the four raw extracts (a missing file is a warning, not a failure)
//! - Validate every header row before anything is written
//! - Truncate all staging tables in one transaction (idempotent reruns)
//! - Append each file batch by batch, so memory stays bounded
//! - Report row counts per source
//!
//! The extractor never merges: a rerun over unchanged raw files leaves the
//! staging tables with exactly the same rows.

use etl_common::batch::BatchSource;
use etl_common::schema::{
    DeclaredSchema, FEATURES_STAGING, STORES_STAGING, TEST_STAGING, TRAIN_STAGING,
};
use etl_common::{sources, staging, AuditLog, EtlConfig, Result, Table, TableStore};
use tracing::debug;

/// A raw file and the staging table it feeds.
#[derive(Debug, Clone, Copy)]
pub struct ExtractSource {
    pub file_name: &'static str,
    pub table: &'static str,
    pub schema: DeclaredSchema,
}

/// Load order. `train.csv` and `test.csv` share `sales_staging`.
pub const EXTRACT_SOURCES: [ExtractSource; 4] = [
    ExtractSource {
        file_name: sources::TRAIN,
        table: staging::SALES,
        schema: TRAIN_STAGING,
    },
    ExtractSource {
        file_name: sources::TEST,
        table: staging::SALES,
        schema: TEST_STAGING,
    },
    ExtractSource {
        file_name: sources::FEATURES,
        table: staging::FEATURES,
        schema: FEATURES_STAGING,
    },
    ExtractSource {
        file_name: sources::STORES,
        table: staging::STORES,
        schema: STORES_STAGING,
    },
];

const STAGING_TABLES: [(&str, DeclaredSchema); 3] = [
    (staging::SALES, TRAIN_STAGING),
    (staging::FEATURES, FEATURES_STAGING),
    (staging::STORES, STORES_STAGING),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoad {
    pub file_name: &'static str,
    pub table: &'static str,
    pub rows: u64,
    pub batches: usize,
    /// Columns filled with null because the file has no such header
    pub synthesized: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub loaded: Vec<SourceLoad>,
    pub missing: Vec<&'static str>,
}

impl ExtractReport {
    pub fn rows_for(&self, file_name: &str) -> Option<u64> {
        self.loaded
            .iter()
            .find(|l| l.file_name == file_name)
            .map(|l| l.rows)
    }

    pub fn total_rows(&self) -> u64 {
        self.loaded.iter().map(|l| l.rows).sum()
    }

    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .loaded
            .iter()
            .map(|l| format!("{}={}", l.file_name, l.rows))
            .collect();
        if !self.missing.is_empty() {
            parts.push(format!("missing=[{}]", self.missing.join(", ")));
        }
        format!("({})", parts.join(", "))
    }
}

/// Run the extract stage, logging start, completion or failure to `audit`.
#[tracing::instrument(name = "extract", skip_all)]
pub async fn run_extract(
    config: &EtlConfig,
    store: &dyn TableStore,
    audit: &AuditLog,
) -> Result<ExtractReport> {
    audit.info("==== EXTRACT STEP STARTED ====");
    match extract(config, store, audit).await {
        Ok(report) => {
            audit.info("==== EXTRACT STEP COMPLETED ====");
            Ok(report)
        }
        Err(e) => {
            audit.error(format!("EXTRACT ERROR: {}", e));
            Err(e)
        }
    }
}

async fn extract(
    config: &EtlConfig,
    store: &dyn TableStore,
    audit: &AuditLog,
) -> Result<ExtractReport> {
    let mut report = ExtractReport::default();

    // Open every present file first: a bad header must fail the run before
    // the truncate destroys the previous staging contents.
    let mut readers = Vec::with_capacity(EXTRACT_SOURCES.len());
    for source in &EXTRACT_SOURCES {
        let batches = BatchSource::new(
            config.raw_path(source.file_name),
            source.schema,
            config.batch_size,
        );
        match batches.open() {
            Ok(reader) => readers.push((source, reader)),
            Err(e) if e.is_recoverable() => {
                audit.warn(format!("expected file missing: {}", batches.path().display()));
                report.missing.push(source.file_name);
            }
            Err(e) => return Err(e),
        }
    }

    for (table, schema) in &STAGING_TABLES {
        store.ensure_table(table, &schema.table_schema()).await?;
    }

    audit.info("Truncating staging tables before load (idempotent run)...");
    store.truncate_tables(&staging::ALL).await?;
    audit.info(format!("Staging tables truncated ({}).", store.describe()));

    for (source, reader) in readers {
        let schema = source.schema.table_schema();
        let mut load = SourceLoad {
            file_name: source.file_name,
            table: source.table,
            rows: 0,
            batches: 0,
            synthesized: reader.mapping().synthesized(),
        };

        for batch in reader {
            let batch = batch?;
            let index = batch.index;
            let data = Table::new(schema.clone(), batch.rows);
            load.rows += store.append(source.table, &data).await?;
            load.batches += 1;
            debug!(
                source = source.file_name,
                batch = index,
                rows = data.len(),
                "appended batch"
            );
        }

        audit.info(format!(
            "Loaded {} -> {} ({} rows)",
            source.file_name, source.table, load.rows
        ));
        report.loaded.push(load);
    }

    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================
