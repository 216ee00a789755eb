//! Run configuration shared by every stage binary.
//!
//! One `EtlConfig` is built at process start (environment, `.env`, flags)
//! and handed to each stage. Nothing downstream reads process globals.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::error::{EtlError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Which backend holds the staging and analytic tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Postgres database described by the JSON connection record
    Postgres,
    /// One CSV file per table on the local filesystem
    Csv,
}

/// Connection record for the relational store.
#[derive(Clone, Deserialize)]
pub struct DbConfig {
    pub user: String,
    pub password: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5432
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

impl DbConfig {
    /// Load and validate the JSON connection record at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "cannot read database config {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
            .map_err(|e| EtlError::Config(format!("{} ({})", e, path.display())))
    }

    pub fn from_json(content: &str) -> std::result::Result<Self, String> {
        let cfg: DbConfig = serde_json::from_str(content)
            .map_err(|e| format!("malformed database config: {}", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.user.trim().is_empty() {
            return Err("database config: 'user' is empty".to_string());
        }
        if self.host.trim().is_empty() {
            return Err("database config: 'host' is empty".to_string());
        }
        if self.database.trim().is_empty() {
            return Err("database config: 'database' is empty".to_string());
        }
        if self.port == 0 {
            return Err("database config: 'port' must be non-zero".to_string());
        }
        Ok(())
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    /// `host:port/database`, safe to log.
    pub fn describe(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Everything a stage needs to know about where to read and write.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub raw_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub clean_dir: PathBuf,
    pub warehouse_dir: PathBuf,
    pub log_file: PathBuf,
    pub batch_size: usize,
    pub store: StoreBackend,
    pub strict_join: bool,
    pub db: Option<DbConfig>,
}

impl EtlConfig {
    /// Filesystem-only layout under `base`: `raw/`, `staging/`, `clean/`,
    /// `warehouse/` and `logs/etl_log.txt`, using the CSV store.
    pub fn local(base: &Path) -> Self {
        Self {
            raw_dir: base.join("raw"),
            staging_dir: base.join("staging"),
            clean_dir: base.join("clean"),
            warehouse_dir: base.join("warehouse"),
            log_file: base.join("logs").join("etl_log.txt"),
            batch_size: DEFAULT_BATCH_SIZE,
            store: StoreBackend::Csv,
            strict_join: false,
            db: None,
        }
    }

    pub fn raw_path(&self, file_name: &str) -> PathBuf {
        self.raw_dir.join(file_name)
    }

    pub fn clean_path(&self, file_name: &str) -> PathBuf {
        self.clean_dir.join(file_name)
    }
}

/// Flags shared by the `extractor`, `transformer`, `loader` and
/// `etl-pipeline` binaries. Each flag falls back to an environment variable.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Directory holding train.csv, test.csv, features.csv and stores.csv
    #[arg(long, env = "RAW_DIR", default_value = "data/raw")]
    pub raw_dir: PathBuf,

    /// Directory for staging tables when the csv store is selected
    #[arg(long, env = "STAGING_DIR", default_value = "data/staging")]
    pub staging_dir: PathBuf,

    /// Directory the transformer writes clean files into
    #[arg(long, env = "CLEAN_DIR", default_value = "data/clean")]
    pub clean_dir: PathBuf,

    /// Directory for analytic tables when the csv store is selected
    #[arg(long, env = "WAREHOUSE_DIR", default_value = "data/warehouse")]
    pub warehouse_dir: PathBuf,

    /// Append-only audit log
    #[arg(long, env = "ETL_LOG_FILE", default_value = "logs/etl_log.txt")]
    pub log_file: PathBuf,

    /// JSON connection record: {user, password, host, port, database}
    #[arg(long, env = "DB_CONFIG", default_value = "config/db_config.json")]
    pub db_config: PathBuf,

    /// Rows per batch during chunked ingestion
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Store backend for staging and analytic tables
    #[arg(long, env = "ETL_STORE", value_enum, default_value = "postgres")]
    pub store: StoreBackend,

    /// Fail the transform when a join produces more rows than sales
    #[arg(long, env = "STRICT_JOIN")]
    pub strict_join: bool,
}

impl CommonArgs {
    /// Validate the flags and load the connection record if needed.
    pub fn into_config(self) -> Result<EtlConfig> {
        if self.batch_size == 0 {
            return Err(EtlError::Config("batch size must be at least 1".to_string()));
        }

        let db = match self.store {
            StoreBackend::Postgres => Some(DbConfig::load(&self.db_config)?),
            StoreBackend::Csv => None,
        };

        Ok(EtlConfig {
            raw_dir: self.raw_dir,
            staging_dir: self.staging_dir,
            clean_dir: self.clean_dir,
            warehouse_dir: self.warehouse_dir,
            log_file: self.log_file,
            batch_size: self.batch_size,
            store: self.store,
            strict_join: self.strict_join,
            db,
        })
    }
}
