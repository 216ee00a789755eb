//! Declared schemas for every raw source, staging table and clean file.
//!
//! Headers are matched case- and whitespace-insensitively against each
//! column's aliases; output names are always the fixed lower-case canonical
//! names below. A required column that no header matches is a
//! `SchemaMismatch`, raised as soon as the header row has been read.

use std::fmt;

use chrono::NaiveDate;
use csv::StringRecord;

use crate::error::{EtlError, Result};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Cell contents treated as null, compared case-insensitively.
const NULL_TOKENS: &[&str] = &["", "na", "n/a", "nan", "null", "none"];

// =============================================================================
// Column types and values
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Date,
    Boolean,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Date => "DATE",
            ColumnType::Boolean => "BOOLEAN",
        }
    }

    /// Parse one trimmed cell. Null tokens yield `Value::Null` for every type.
    pub fn parse(&self, raw: &str) -> std::result::Result<Value, String> {
        let raw = raw.trim();
        if is_null_token(raw) {
            return Ok(Value::Null);
        }
        match self {
            ColumnType::Integer => raw
                .parse::<i64>()
                .or_else(|_| match raw.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                    _ => Err(()),
                })
                .map(Value::Int)
                .map_err(|_| "not an integer".to_string()),
            ColumnType::Float => raw
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| "not a number".to_string()),
            ColumnType::Text => Ok(Value::Text(raw.to_string())),
            ColumnType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|e| format!("not a {} date: {}", DATE_FORMAT, e)),
            ColumnType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "f" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err("not a boolean".to_string()),
            },
        }
    }
}

fn is_null_token(raw: &str) -> bool {
    NULL_TOKENS.iter().any(|t| raw.eq_ignore_ascii_case(t))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Hashable form used for join keys. Null never matches anything.
    pub fn key(&self) -> Option<Key> {
        match self {
            Value::Null => None,
            Value::Int(i) => Some(Key::Int(*i)),
            Value::Float(f) => Some(Key::Float(f.to_bits())),
            Value::Text(s) => Some(Key::Text(s.clone())),
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Date(d) => Some(Key::Date(*d)),
        }
    }
}

/// CSV cell rendering; `Null` renders as an empty cell.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Float(u64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
}

// =============================================================================
// Table schemas (owned, used by tables and stores)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

// =============================================================================
// Declared schemas
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Header must be present
    Required,
    /// Filled with null when the header is absent
    Synthesized,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    /// Accepted headers after normalization (lower-case, trimmed)
    pub aliases: &'static [&'static str],
    pub ty: ColumnType,
    pub nullable: bool,
    pub presence: Presence,
}

const fn col(
    name: &'static str,
    aliases: &'static [&'static str],
    ty: ColumnType,
    nullable: bool,
) -> ColumnSpec {
    ColumnSpec {
        name,
        aliases,
        ty,
        nullable,
        presence: Presence::Required,
    }
}

const fn synthesized(
    name: &'static str,
    aliases: &'static [&'static str],
    ty: ColumnType,
) -> ColumnSpec {
    ColumnSpec {
        name,
        aliases,
        ty,
        nullable: true,
        presence: Presence::Synthesized,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeclaredSchema {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl DeclaredSchema {
    pub fn table_schema(&self) -> TableSchema {
        TableSchema::new(
            self.columns
                .iter()
                .map(|c| Column::new(c.name, c.ty, c.nullable))
                .collect(),
        )
    }

    /// Match normalized headers to declared columns.
    pub fn resolve(&self, source_name: &str, headers: &[String]) -> Result<ColumnMapping> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

        let mut positions = Vec::with_capacity(self.columns.len());
        for spec in self.columns {
            let found = normalized
                .iter()
                .position(|h| spec.aliases.iter().any(|a| a == h));
            match (found, spec.presence) {
                (Some(idx), _) => positions.push(Some(idx)),
                (None, Presence::Synthesized) => positions.push(None),
                (None, Presence::Required) => {
                    return Err(EtlError::SchemaMismatch {
                        source_name: source_name.to_string(),
                        column: spec.name.to_string(),
                        headers: normalized,
                    })
                }
            }
        }

        let ignored: Vec<&str> = normalized
            .iter()
            .enumerate()
            .filter(|(i, _)| !positions.contains(&Some(*i)))
            .map(|(_, h)| h.as_str())
            .collect();
        if !ignored.is_empty() {
            tracing::debug!(source = source_name, ?ignored, "dropping undeclared columns");
        }

        Ok(ColumnMapping {
            source_name: source_name.to_string(),
            specs: self.columns,
            positions,
        })
    }
}

/// Header positions resolved for one source file.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    source_name: String,
    specs: &'static [ColumnSpec],
    positions: Vec<Option<usize>>,
}

impl ColumnMapping {
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Columns the mapping had to synthesize as null.
    pub fn synthesized(&self) -> Vec<&'static str> {
        self.specs
            .iter()
            .zip(&self.positions)
            .filter(|(_, p)| p.is_none())
            .map(|(s, _)| s.name)
            .collect()
    }

    /// Project and type one raw record into declared column order.
    pub fn project(&self, record: &StringRecord, line: u64) -> Result<Vec<Value>> {
        let mut row = Vec::with_capacity(self.specs.len());
        for (spec, pos) in self.specs.iter().zip(&self.positions) {
            let raw = match pos {
                Some(idx) => record.get(*idx).unwrap_or(""),
                None => {
                    row.push(Value::Null);
                    continue;
                }
            };
            let value = spec.ty.parse(raw).map_err(|reason| EtlError::InvalidValue {
                source_name: self.source_name.clone(),
                column: spec.name.to_string(),
                line,
                value: raw.to_string(),
                reason,
            })?;
            if value.is_null() && !spec.nullable {
                return Err(EtlError::InvalidValue {
                    source_name: self.source_name.clone(),
                    column: spec.name.to_string(),
                    line,
                    value: raw.to_string(),
                    reason: "null in non-nullable column".to_string(),
                });
            }
            row.push(value);
        }
        Ok(row)
    }
}

/// Trim whitespace and byte-order marks, then lower-case.
pub fn normalize_header(header: &str) -> String {
    header
        .trim_matches(|c: char| c == '\u{feff}' || c.is_whitespace())
        .to_lowercase()
}

// -----------------------------------------------------------------------------
// Source and clean-file schemas
// -----------------------------------------------------------------------------

use ColumnType::{Boolean, Date, Float, Integer, Text};

const STORE: &[&str] = &["store"];
const DEPT: &[&str] = &["dept"];
const IS_HOLIDAY: &[&str] = &["isholiday", "is_holiday"];
const WEEKLY_SALES: &[&str] = &["weekly_sales"];
const TEMPERATURE: &[&str] = &["temperature"];
const FUEL_PRICE: &[&str] = &["fuel_price"];
const MARKDOWN1: &[&str] = &["markdown1"];
const MARKDOWN2: &[&str] = &["markdown2"];
const MARKDOWN3: &[&str] = &["markdown3"];
const MARKDOWN4: &[&str] = &["markdown4"];
const MARKDOWN5: &[&str] = &["markdown5"];
const CPI: &[&str] = &["cpi"];
const UNEMPLOYMENT: &[&str] = &["unemployment"];
const STORE_TYPE: &[&str] = &["type", "store_type"];
const SIZE: &[&str] = &["size"];

const SALE_DATE_RAW: &[&str] = &["date", "sale_date_raw"];
const SALE_DATE: &[&str] = &["date", "sale_date"];
const FEATURE_DATE_RAW: &[&str] = &["date", "feature_date_raw"];
const FEATURE_DATE: &[&str] = &["date", "feature_date"];

/// `train.csv` into `sales_staging`.
pub const TRAIN_STAGING: DeclaredSchema = DeclaredSchema {
    name: "sales_staging",
    columns: &[
        col("store", STORE, Integer, false),
        col("dept", DEPT, Integer, false),
        col("sale_date_raw", SALE_DATE_RAW, Text, false),
        col("weekly_sales", WEEKLY_SALES, Float, true),
        col("is_holiday", IS_HOLIDAY, Boolean, false),
    ],
};

/// `test.csv` into `sales_staging`; the test extract carries no sales figure.
pub const TEST_STAGING: DeclaredSchema = DeclaredSchema {
    name: "sales_staging",
    columns: &[
        col("store", STORE, Integer, false),
        col("dept", DEPT, Integer, false),
        col("sale_date_raw", SALE_DATE_RAW, Text, false),
        synthesized("weekly_sales", WEEKLY_SALES, Float),
        col("is_holiday", IS_HOLIDAY, Boolean, false),
    ],
};

pub const FEATURES_STAGING: DeclaredSchema = DeclaredSchema {
    name: "features_staging",
    columns: &[
        col("store", STORE, Integer, false),
        col("feature_date_raw", FEATURE_DATE_RAW, Text, false),
        col("temperature", TEMPERATURE, Float, true),
        col("fuel_price", FUEL_PRICE, Float, true),
        col("markdown1", MARKDOWN1, Float, true),
        col("markdown2", MARKDOWN2, Float, true),
        col("markdown3", MARKDOWN3, Float, true),
        col("markdown4", MARKDOWN4, Float, true),
        col("markdown5", MARKDOWN5, Float, true),
        col("cpi", CPI, Float, true),
        col("unemployment", UNEMPLOYMENT, Float, true),
        col("is_holiday", IS_HOLIDAY, Boolean, false),
    ],
};

pub const STORES_STAGING: DeclaredSchema = DeclaredSchema {
    name: "stores_staging",
    columns: &[
        col("store", STORE, Integer, false),
        col("store_type", STORE_TYPE, Text, false),
        col("size", SIZE, Integer, false),
    ],
};

pub const SALES_CLEAN: DeclaredSchema = DeclaredSchema {
    name: "sales_clean",
    columns: &[
        col("store", STORE, Integer, false),
        col("dept", DEPT, Integer, false),
        col("sale_date", SALE_DATE, Date, false),
        col("weekly_sales", WEEKLY_SALES, Float, true),
        col("is_holiday", IS_HOLIDAY, Boolean, false),
    ],
};

pub const FEATURES_CLEAN: DeclaredSchema = DeclaredSchema {
    name: "features_clean",
    columns: &[
        col("store", STORE, Integer, false),
        col("feature_date", FEATURE_DATE, Date, false),
        col("temperature", TEMPERATURE, Float, true),
        col("fuel_price", FUEL_PRICE, Float, true),
        col("markdown1", MARKDOWN1, Float, true),
        col("markdown2", MARKDOWN2, Float, true),
        col("markdown3", MARKDOWN3, Float, true),
        col("markdown4", MARKDOWN4, Float, true),
        col("markdown5", MARKDOWN5, Float, true),
        col("cpi", CPI, Float, true),
        col("unemployment", UNEMPLOYMENT, Float, true),
        col("is_holiday", IS_HOLIDAY, Boolean, false),
    ],
};

pub const STORES_CLEAN: DeclaredSchema = DeclaredSchema {
    name: "stores_clean",
    columns: &[
        col("store", STORE, Integer, false),
        col("store_type", STORE_TYPE, Text, false),
        col("size", SIZE, Integer, false),
    ],
};

/// `full_dataset_clean.csv`: sales left-joined with features and stores.
/// Everything contributed by the right-hand sides is nullable.
pub const FACT_CLEAN: DeclaredSchema = DeclaredSchema {
    name: "fact_sales",
    columns: &[
        col("store", STORE, Integer, false),
        col("dept", DEPT, Integer, false),
        col("sale_date", &["sale_date"], Date, false),
        col("weekly_sales", WEEKLY_SALES, Float, true),
        col("is_holiday", &["is_holiday"], Boolean, false),
        col("feature_date", &["feature_date"], Date, true),
        col("temperature", TEMPERATURE, Float, true),
        col("fuel_price", FUEL_PRICE, Float, true),
        col("markdown1", MARKDOWN1, Float, true),
        col("markdown2", MARKDOWN2, Float, true),
        col("markdown3", MARKDOWN3, Float, true),
        col("markdown4", MARKDOWN4, Float, true),
        col("markdown5", MARKDOWN5, Float, true),
        col("cpi", CPI, Float, true),
        col("unemployment", UNEMPLOYMENT, Float, true),
        col("feature_is_holiday", &["feature_is_holiday"], Boolean, true),
        col("store_type", &["store_type"], Text, true),
        col("size", SIZE, Integer, true),
    ],
};
