//! In-memory tables and their CSV form.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::batch::BatchSource;
use crate::error::Result;
use crate::schema::{DeclaredSchema, TableSchema, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub schema: TableSchema,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(schema: TableSchema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    pub fn empty(schema: TableSchema) -> Self {
        Self::new(schema, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

/// A file written by `write_csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub rows: usize,
    /// `sha256:<hex>` of the bytes on disk
    pub content_hash: String,
}

/// Read a whole CSV file through the batch reader.
pub fn read_csv(path: &Path, schema: DeclaredSchema, batch_size: usize) -> Result<Table> {
    let rows = BatchSource::new(path, schema, batch_size).open()?.read_all()?;
    Ok(Table::new(schema.table_schema(), rows))
}

/// Write `table` with a header row. The file is written beside its target
/// and renamed into place, so readers never see a half-written file.
pub fn write_csv(path: &Path, table: &Table) -> Result<WrittenFile> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = tmp_path(path);
    let mut hashing = HashingWriter::new(BufWriter::new(File::create(&tmp)?));
    {
        let mut writer = csv::Writer::from_writer(&mut hashing);
        write_records(&mut writer, table, true)?;
        writer.flush()?;
    }
    let content_hash = hashing.finish()?;
    fs::rename(&tmp, path)?;

    Ok(WrittenFile {
        path: path.to_path_buf(),
        rows: table.len(),
        content_hash,
    })
}

pub(crate) fn write_records<W: Write>(
    writer: &mut csv::Writer<W>,
    table: &Table,
    with_header: bool,
) -> Result<()> {
    if with_header {
        writer.write_record(table.schema.names())?;
    }
    for row in &table.rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    Ok(())
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// `sha256:<hex>` fingerprint of a byte slice.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(mut self) -> io::Result<String> {
        self.inner.flush()?;
        Ok(format!("sha256:{:x}", self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
