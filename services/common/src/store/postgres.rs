use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::TableStore;
use crate::config::DbConfig;
use crate::error::{EtlError, Result};
use crate::schema::{ColumnType, TableSchema, Value};
use crate::table::Table;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;
const MAX_ROWS_PER_INSERT: usize = 1_000;

pub struct PgTableStore {
    pool: PgPool,
    label: String,
}

impl PgTableStore {
    pub async fn connect(db: &DbConfig) -> Result<Self> {
        let label = db.describe();
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(db.connect_options())
            .await
            .map_err(|e| EtlError::Connection {
                store: label.clone(),
                message: e.to_string(),
            })?;
        Ok(Self::from_pool(pool, label))
    }

    pub fn from_pool(pool: PgPool, label: impl Into<String>) -> Self {
        Self {
            pool,
            label: label.into(),
        }
    }

    fn db_err(&self, table: &str, err: sqlx::Error) -> EtlError {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => EtlError::Connection {
                store: self.label.clone(),
                message: err.to_string(),
            },
            other => EtlError::store(table, other),
        }
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    fn describe(&self) -> String {
        format!("postgres://{}", self.label)
    }

    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> Result<()> {
        let sql = create_table_sql(table, schema, true);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| self.db_err(table, e))?;
        Ok(())
    }

    async fn truncate_tables(&self, tables: &[&str]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| self.db_err("*", e))?;
        for table in tables {
            let sql = format!("TRUNCATE TABLE {}", quote_ident(table));
            sqlx::query(&sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| self.db_err(table, e))?;
        }
        tx.commit().await.map_err(|e| self.db_err("*", e))?;
        Ok(())
    }

    async fn append(&self, table: &str, data: &Table) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| self.db_err(table, e))?;
        let inserted = insert_rows(&mut tx, table, data)
            .await
            .map_err(|e| self.db_err(table, e))?;
        tx.commit().await.map_err(|e| self.db_err(table, e))?;
        Ok(inserted)
    }

    async fn replace_table(&self, table: &str, data: &Table) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(|e| self.db_err(table, e))?;

        let drop_sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table));
        sqlx::query(&drop_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.db_err(table, e))?;

        let create_sql = create_table_sql(table, &data.schema, false);
        sqlx::query(&create_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.db_err(table, e))?;

        let inserted = insert_rows(&mut tx, table, data)
            .await
            .map_err(|e| self.db_err(table, e))?;

        tx.commit().await.map_err(|e| self.db_err(table, e))?;
        Ok(inserted)
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.db_err(table, e))?;
        Ok(count as u64)
    }
}

async fn insert_rows(
    conn: &mut PgConnection,
    table: &str,
    data: &Table,
) -> std::result::Result<u64, sqlx::Error> {
    if data.rows.is_empty() || data.schema.is_empty() {
        return Ok(0);
    }

    let columns = data
        .schema
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let rows_per_insert = (MAX_BIND_PARAMS / data.schema.len()).clamp(1, MAX_ROWS_PER_INSERT);

    let mut inserted = 0;
    for chunk in data.rows.chunks(rows_per_insert) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} ({}) ", quote_ident(table), columns));
        builder.push_values(chunk, |mut b, row| {
            for (column, value) in data.schema.columns.iter().zip(row) {
                push_value(&mut b, column.ty, value);
            }
        });
        let result = builder.build().execute(&mut *conn).await?;
        inserted += result.rows_affected();
    }

    debug!(table, rows = inserted, "inserted rows");
    Ok(inserted)
}

/// Nulls are bound with the column's own type so Postgres accepts them.
fn push_value(b: &mut Separated<'_, '_, Postgres, &'static str>, ty: ColumnType, value: &Value) {
    match value {
        Value::Null => match ty {
            ColumnType::Integer => {
                b.push_bind(None::<i64>);
            }
            ColumnType::Float => {
                b.push_bind(None::<f64>);
            }
            ColumnType::Text => {
                b.push_bind(None::<String>);
            }
            ColumnType::Date => {
                b.push_bind(None::<NaiveDate>);
            }
            ColumnType::Boolean => {
                b.push_bind(None::<bool>);
            }
        },
        Value::Int(i) => {
            b.push_bind(*i);
        }
        Value::Float(f) => {
            b.push_bind(*f);
        }
        Value::Text(s) => {
            b.push_bind(s.clone());
        }
        Value::Bool(v) => {
            b.push_bind(*v);
        }
        Value::Date(d) => {
            b.push_bind(*d);
        }
    }
}

fn create_table_sql(table: &str, schema: &TableSchema, if_not_exists: bool) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| {
            format!(
                "{} {}{}",
                quote_ident(&c.name),
                c.ty.sql_type(),
                if c.nullable { "" } else { " NOT NULL" }
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote_ident(table),
        columns
    )
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
