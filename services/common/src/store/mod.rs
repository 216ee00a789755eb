//! Table stores: where staging and analytic tables live.
//!
//! The stages only speak `TableStore`. Postgres is the production backend;
//! the CSV directory backend keeps one file per table and is what the
//! stage tests run against.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EtlConfig, StoreBackend};
use crate::error::{EtlError, Result};
use crate::schema::TableSchema;
use crate::table::Table;

mod csv_dir;
mod postgres;

pub use csv_dir::CsvDirStore;
pub use postgres::PgTableStore;

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Human-readable location, safe to log.
    fn describe(&self) -> String;

    /// Create `table` with `schema` unless it already exists.
    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> Result<()>;

    /// Empty every table in `tables` as one unit: either all are emptied or
    /// none is.
    async fn truncate_tables(&self, tables: &[&str]) -> Result<()>;

    /// Append rows to an existing table. Returns the number of rows written.
    async fn append(&self, table: &str, data: &Table) -> Result<u64>;

    /// Drop and recreate `table` from `data`. Readers see either the old
    /// table or the new one, never an intermediate state.
    async fn replace_table(&self, table: &str, data: &Table) -> Result<u64>;

    async fn row_count(&self, table: &str) -> Result<u64>;
}

/// The two stores a pipeline run writes to.
#[derive(Clone)]
pub struct Stores {
    pub staging: Arc<dyn TableStore>,
    pub analytic: Arc<dyn TableStore>,
}

impl Stores {
    /// Connect according to the configured backend. With Postgres both
    /// roles share one pool.
    pub async fn open(config: &EtlConfig) -> Result<Self> {
        match config.store {
            StoreBackend::Postgres => {
                let db = config.db.as_ref().ok_or_else(|| {
                    EtlError::Config("postgres store selected but no database config loaded".into())
                })?;
                let store = Arc::new(PgTableStore::connect(db).await?);
                Ok(Self {
                    staging: store.clone(),
                    analytic: store,
                })
            }
            StoreBackend::Csv => Ok(Self {
                staging: Arc::new(CsvDirStore::new(&config.staging_dir)),
                analytic: Arc::new(CsvDirStore::new(&config.warehouse_dir)),
            }),
        }
    }
}
