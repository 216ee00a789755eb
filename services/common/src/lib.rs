//! Shared building blocks for the retail sales ETL services.
//!
//! - `config`: the run configuration handed to every stage
//! - `audit`: the append-only, timestamped audit trail
//! - `schema`: declared schemas and canonical column names
//! - `batch`: chunked, restartable CSV ingestion
//! - `table`: in-memory tables and clean-file I/O
//! - `store`: staging and analytic table stores (Postgres, CSV directory)

pub mod audit;
pub mod batch;
pub mod config;
pub mod error;
pub mod logging;
pub mod schema;
pub mod store;
pub mod table;

pub use audit::AuditLog;
pub use config::{CommonArgs, DbConfig, EtlConfig, StoreBackend};
pub use error::{EtlError, Result};
pub use store::{CsvDirStore, PgTableStore, Stores, TableStore};
pub use table::Table;

/// Raw source files expected in the raw directory.
pub mod sources {
    pub const TRAIN: &str = "train.csv";
    pub const TEST: &str = "test.csv";
    pub const FEATURES: &str = "features.csv";
    pub const STORES: &str = "stores.csv";
}

/// Staging tables populated by the extractor.
pub mod staging {
    pub const SALES: &str = "sales_staging";
    pub const FEATURES: &str = "features_staging";
    pub const STORES: &str = "stores_staging";

    pub const ALL: [&str; 3] = [SALES, FEATURES, STORES];
}

/// Clean files written by the transformer and read by the loader.
pub mod clean {
    pub const SALES: &str = "sales_clean.csv";
    pub const FEATURES: &str = "features_clean.csv";
    pub const STORES: &str = "stores_clean.csv";
    pub const FULL_DATASET: &str = "full_dataset_clean.csv";
}
