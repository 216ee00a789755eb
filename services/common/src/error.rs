use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the pipeline stages.
///
/// `MissingSourceFile` is the only variant a stage absorbs on its own; every
/// other variant aborts the stage that produced it.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("source file missing: {}", path.display())]
    MissingSourceFile { path: PathBuf },

    #[error("cannot connect to {store} store: {message}")]
    Connection { store: String, message: String },

    #[error("schema mismatch in {source_name}: expected column '{column}' not found (headers: {headers:?})")]
    SchemaMismatch {
        source_name: String,
        column: String,
        headers: Vec<String>,
    },

    #[error("failed to read batch {batch} of {source_name} near line {line}: {message}")]
    BatchRead {
        source_name: String,
        batch: usize,
        line: u64,
        message: String,
    },

    #[error("invalid value '{value}' for column '{column}' in {source_name} at line {line}: {reason}")]
    InvalidValue {
        source_name: String,
        column: String,
        line: u64,
        value: String,
        reason: String,
    },

    #[error("join with {right} fanned out: {left_rows} left rows produced {output_rows} rows")]
    JoinFanOut {
        right: String,
        left_rows: usize,
        output_rows: usize,
    },

    #[error("store operation on table '{table}' failed: {message}")]
    Store { table: String, message: String },

    #[error("stage {stage} failed: {reason}")]
    Stage { stage: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EtlError {
    pub fn store(table: &str, err: impl std::fmt::Display) -> Self {
        EtlError::Store {
            table: table.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether a stage may log this error and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EtlError::MissingSourceFile { .. })
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
