//! Chunked CSV ingestion.
//!
//! A `BatchSource` names a file and its declared schema; each call to
//! `open` starts a fresh `BatchReader` from the top of the file, so the
//! batch sequence is finite and restartable. A read or parse error is
//! returned as an `Err` item and ends the sequence: callers never see a
//! silently shortened file.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;

use crate::error::{EtlError, Result};
use crate::schema::{ColumnMapping, DeclaredSchema, Value};

/// One bounded slice of a source file, already projected onto the schema.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based position of this batch in the file
    pub index: usize,
    /// File line of the first row in the batch
    pub first_line: u64,
    pub rows: Vec<Vec<Value>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BatchSource {
    path: PathBuf,
    source_name: String,
    schema: DeclaredSchema,
    batch_size: usize,
}

impl BatchSource {
    pub fn new(path: impl Into<PathBuf>, schema: DeclaredSchema, batch_size: usize) -> Self {
        let path = path.into();
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            source_name,
            schema,
            batch_size: batch_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn schema(&self) -> &DeclaredSchema {
        &self.schema
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Open the file and validate its header row against the schema.
    pub fn open(&self) -> Result<BatchReader<File>> {
        let file = File::open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EtlError::MissingSourceFile {
                path: self.path.clone(),
            },
            _ => EtlError::Io(e),
        })?;
        BatchReader::from_reader(file, &self.source_name, self.schema, self.batch_size)
    }
}

pub struct BatchReader<R: Read> {
    reader: csv::Reader<R>,
    mapping: ColumnMapping,
    batch_size: usize,
    next_index: usize,
    record: StringRecord,
    done: bool,
}

impl<R: Read> BatchReader<R> {
    pub fn from_reader(
        rdr: R,
        source_name: &str,
        schema: DeclaredSchema,
        batch_size: usize,
    ) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(false)
            .trim(csv::Trim::All)
            .from_reader(rdr);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| EtlError::BatchRead {
                source_name: source_name.to_string(),
                batch: 0,
                line: 1,
                message: format!("cannot read header row: {}", e),
            })?
            .iter()
            .map(str::to_string)
            .collect();

        let mapping = schema.resolve(source_name, &headers)?;

        Ok(Self {
            reader,
            mapping,
            batch_size: batch_size.max(1),
            next_index: 1,
            record: StringRecord::new(),
            done: false,
        })
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Drain every batch into one row vector, stopping at the first error.
    pub fn read_all(self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        for batch in self {
            rows.extend(batch?.rows);
        }
        Ok(rows)
    }

    fn fail(&mut self, err: EtlError) -> Option<Result<Batch>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<R: Read> Iterator for BatchReader<R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let index = self.next_index;
        let mut rows = Vec::with_capacity(self.batch_size.min(4096));
        let mut first_line = 0;

        while rows.len() < self.batch_size {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {
                    let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                    if rows.is_empty() {
                        first_line = line;
                    }
                    match self.mapping.project(&self.record, line) {
                        Ok(row) => rows.push(row),
                        Err(e) => return self.fail(e),
                    }
                }
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    let line = e
                        .position()
                        .map(|p| p.line())
                        .unwrap_or(first_line + rows.len() as u64);
                    let err = EtlError::BatchRead {
                        source_name: self.mapping.source_name().to_string(),
                        batch: index,
                        line,
                        message: e.to_string(),
                    };
                    return self.fail(err);
                }
            }
        }

        if rows.is_empty() {
            return None;
        }
        self.next_index += 1;
        Some(Ok(Batch {
            index,
            first_line,
            rows,
        }))
    }
}
