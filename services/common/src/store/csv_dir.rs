use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::TableStore;
use crate::error::{EtlError, Result};
use crate::schema::TableSchema;
use crate::table::{tmp_path, write_csv, write_records, Table};

/// One `<table>.csv` file per table under a root directory.
#[derive(Debug, Clone)]
pub struct CsvDirStore {
    root: PathBuf,
}

impl CsvDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{}.csv", table))
    }

    fn header_of(&self, table: &str) -> Result<Vec<String>> {
        let path = self.table_path(table);
        if !path.is_file() {
            return Err(EtlError::store(table, "table does not exist"));
        }
        let mut reader = csv::Reader::from_path(&path)?;
        Ok(reader.headers()?.iter().map(str::to_string).collect())
    }
}

#[async_trait]
impl TableStore for CsvDirStore {
    fn describe(&self) -> String {
        format!("csv://{}", self.root.display())
    }

    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        if !self.table_path(table).is_file() {
            write_csv(&self.table_path(table), &Table::empty(schema.clone()))?;
        }
        Ok(())
    }

    async fn truncate_tables(&self, tables: &[&str]) -> Result<()> {
        // Stage every header-only file first so a missing table leaves the
        // others untouched.
        let mut staged = Vec::with_capacity(tables.len());
        for table in tables {
            let header = match self.header_of(table) {
                Ok(h) => h,
                Err(e) => {
                    for tmp in &staged {
                        let _ = fs::remove_file(tmp);
                    }
                    return Err(e);
                }
            };
            let tmp = tmp_path(&self.table_path(table));
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(&header)?;
            writer.flush()?;
            staged.push(tmp);
        }
        for (table, tmp) in tables.iter().zip(&staged) {
            fs::rename(tmp, self.table_path(table))?;
        }
        Ok(())
    }

    async fn append(&self, table: &str, data: &Table) -> Result<u64> {
        let header = self.header_of(table)?;
        if header != data.schema.names() {
            return Err(EtlError::store(
                table,
                format!(
                    "column mismatch: table has {:?}, rows have {:?}",
                    header,
                    data.schema.names()
                ),
            ));
        }

        let file = OpenOptions::new()
            .append(true)
            .open(self.table_path(table))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        write_records(&mut writer, data, false)?;
        writer.flush()?;
        Ok(data.len() as u64)
    }

    async fn replace_table(&self, table: &str, data: &Table) -> Result<u64> {
        fs::create_dir_all(&self.root)?;
        let written = write_csv(&self.table_path(table), data)?;
        Ok(written.rows as u64)
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let path = self.table_path(table);
        if !path.is_file() {
            return Err(EtlError::store(table, "table does not exist"));
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut count = 0;
        for record in reader.records() {
            record?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Value, STORES_STAGING, TRAIN_STAGING};

    fn stores(rows: &[(i64, &str, i64)]) -> Table {
        Table::new(
            STORES_STAGING.table_schema(),
            rows.iter()
                .map(|(s, t, z)| vec![Value::Int(*s), Value::Text(t.to_string()), Value::Int(*z)])
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvDirStore::new(dir.path());
        let schema = STORES_STAGING.table_schema();

        store.ensure_table("stores_staging", &schema).await.unwrap();
        store.append("stores_staging", &stores(&[(1, "A", 10)])).await.unwrap();
        store.ensure_table("stores_staging", &schema).await.unwrap();

        assert_eq!(store.row_count("stores_staging").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_truncate_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvDirStore::new(dir.path());
        store
            .ensure_table("stores_staging", &STORES_STAGING.table_schema())
            .await
            .unwrap();
        store
            .ensure_table("sales_staging", &TRAIN_STAGING.table_schema())
            .await
            .unwrap();
        store
            .append("stores_staging", &stores(&[(1, "A", 10), (2, "B", 20)]))
            .await
            .unwrap();

        store
            .truncate_tables(&["stores_staging", "sales_staging"])
            .await
            .unwrap();
        assert_eq!(store.row_count("stores_staging").await.unwrap(), 0);

        store
            .append("stores_staging", &stores(&[(3, "C", 30)]))
            .await
            .unwrap();
        assert_eq!(store.row_count("stores_staging").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_truncate_with_missing_table_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvDirStore::new(dir.path());
        store
            .ensure_table("stores_staging", &STORES_STAGING.table_schema())
            .await
            .unwrap();
        store
            .append("stores_staging", &stores(&[(1, "A", 10)]))
            .await
            .unwrap();

        let result = store
            .truncate_tables(&["stores_staging", "features_staging"])
            .await;
        assert!(result.is_err());
        assert_eq!(store.row_count("stores_staging").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_rejects_column_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvDirStore::new(dir.path());
        store
            .ensure_table("sales_staging", &TRAIN_STAGING.table_schema())
            .await
            .unwrap();
        let err = store
            .append("sales_staging", &stores(&[(1, "A", 10)]))
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Store { .. }));
    }

    #[tokio::test]
    async fn test_replace_table_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvDirStore::new(dir.path());
        store
            .replace_table("stores_clean", &stores(&[(1, "A", 10), (2, "B", 20)]))
            .await
            .unwrap();
        store
            .replace_table("stores_clean", &stores(&[(1, "A", 10), (2, "B", 20)]))
            .await
            .unwrap();
        assert_eq!(store.row_count("stores_clean").await.unwrap(), 2);
    }
}
