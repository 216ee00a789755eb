//! Hash left join over in-memory tables.
//!
//! Every left row appears at least once in the output. A left row whose key
//! matches several right rows appears once per match (fan-out), which the
//! returned `JoinReport` makes visible.

use std::collections::HashMap;

use etl_common::schema::{Column, Key, TableSchema, Value};
use etl_common::{EtlError, Result, Table};

/// How to join one right-hand table onto the left.
#[derive(Debug, Clone, Copy)]
pub struct JoinSpec<'a> {
    /// Name used in reports and log lines
    pub right_name: &'a str,
    /// `(left column, right column)` pairs compared for equality
    pub keys: &'a [(&'a str, &'a str)],
    /// Prepended to right-hand columns whose name is already taken
    pub collision_prefix: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    pub right: String,
    pub left_rows: usize,
    pub right_rows: usize,
    pub output_rows: usize,
    /// Left rows that matched nothing and were padded with nulls
    pub unmatched_left_rows: usize,
    /// Distinct right-hand keys that occur more than once
    pub duplicate_right_keys: usize,
}

impl JoinReport {
    /// Rows beyond one per left row.
    pub fn fan_out(&self) -> usize {
        self.output_rows.saturating_sub(self.left_rows)
    }

    pub fn has_fan_out(&self) -> bool {
        self.output_rows > self.left_rows
    }
}

pub fn left_join(left: &Table, right: &Table, spec: &JoinSpec<'_>) -> Result<(Table, JoinReport)> {
    let mut left_idx = Vec::with_capacity(spec.keys.len());
    let mut right_idx = Vec::with_capacity(spec.keys.len());
    for (l, r) in spec.keys {
        left_idx.push(key_index(&left.schema, l, "left side")?);
        right_idx.push(key_index(&right.schema, r, spec.right_name)?);
    }

    // A right key column named like its left counterpart would duplicate it.
    let dropped: Vec<usize> = spec
        .keys
        .iter()
        .zip(&right_idx)
        .filter(|((l, r), _)| l == r)
        .map(|(_, idx)| *idx)
        .collect();

    let mut columns = left.schema.columns.clone();
    let mut carried = Vec::new();
    for (idx, column) in right.schema.columns.iter().enumerate() {
        if dropped.contains(&idx) {
            continue;
        }
        let name = if columns.iter().any(|c| c.name == column.name) {
            format!("{}{}", spec.collision_prefix, column.name)
        } else {
            column.name.clone()
        };
        columns.push(Column::new(name, column.ty, true));
        carried.push(idx);
    }

    let mut index: HashMap<Vec<Key>, Vec<usize>> = HashMap::new();
    for (pos, row) in right.rows.iter().enumerate() {
        if let Some(key) = row_key(row, &right_idx) {
            index.entry(key).or_default().push(pos);
        }
    }

    let mut rows = Vec::with_capacity(left.len());
    let mut unmatched = 0;
    for row in &left.rows {
        let matches = row_key(row, &left_idx).and_then(|k| index.get(&k));
        match matches {
            Some(positions) => {
                for &pos in positions {
                    let mut out = row.clone();
                    out.extend(carried.iter().map(|&i| right.rows[pos][i].clone()));
                    rows.push(out);
                }
            }
            None => {
                unmatched += 1;
                let mut out = row.clone();
                out.resize(columns.len(), Value::Null);
                rows.push(out);
            }
        }
    }

    let report = JoinReport {
        right: spec.right_name.to_string(),
        left_rows: left.len(),
        right_rows: right.len(),
        output_rows: rows.len(),
        unmatched_left_rows: unmatched,
        duplicate_right_keys: index.values().filter(|v| v.len() > 1).count(),
    };

    Ok((Table::new(TableSchema::new(columns), rows), report))
}

fn key_index(schema: &TableSchema, column: &str, side: &str) -> Result<usize> {
    schema.index_of(column).ok_or_else(|| EtlError::Stage {
        stage: "transform".to_string(),
        reason: format!("join key '{}' not found on {}", column, side),
    })
}

/// `None` when any key part is null; null keys never match.
fn row_key(row: &[Value], idx: &[usize]) -> Option<Vec<Key>> {
    idx.iter().map(|&i| row[i].key()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use etl_common::schema::ColumnType;

    fn date(d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(2010, 2, d).unwrap())
    }

    fn sales(rows: &[(i64, u32, f64)]) -> Table {
        Table::new(
            TableSchema::new(vec![
                Column::new("store", ColumnType::Integer, false),
                Column::new("sale_date", ColumnType::Date, false),
                Column::new("weekly_sales", ColumnType::Float, true),
                Column::new("is_holiday", ColumnType::Boolean, false),
            ]),
            rows.iter()
                .map(|(s, d, w)| vec![Value::Int(*s), date(*d), Value::Float(*w), Value::Bool(false)])
                .collect(),
        )
    }

    fn features(rows: &[(Value, u32, f64)]) -> Table {
        Table::new(
            TableSchema::new(vec![
                Column::new("store", ColumnType::Integer, false),
                Column::new("feature_date", ColumnType::Date, false),
                Column::new("temperature", ColumnType::Float, true),
                Column::new("is_holiday", ColumnType::Boolean, false),
            ]),
            rows.iter()
                .map(|(s, d, t)| vec![s.clone(), date(*d), Value::Float(*t), Value::Bool(true)])
                .collect(),
        )
    }

    const BY_STORE_DATE: JoinSpec<'static> = JoinSpec {
        right_name: "features",
        keys: &[("store", "store"), ("sale_date", "feature_date")],
        collision_prefix: "feature_",
    };

    // -------------------------------------------------------------------------
    // CARDINALITY
    // -------------------------------------------------------------------------

    #[test]
    fn test_unique_keys_preserve_left_cardinality() {
        let left = sales(&[(1, 5, 10.0), (1, 12, 20.0), (2, 5, 30.0)]);
        let right = features(&[(Value::Int(1), 5, 40.0), (Value::Int(2), 5, 41.0)]);

        let (joined, report) = left_join(&left, &right, &BY_STORE_DATE).unwrap();
        assert_eq!(joined.len(), 3);
        assert_eq!(report.output_rows, report.left_rows);
        assert!(!report.has_fan_out());
        assert_eq!(report.unmatched_left_rows, 1);
        assert_eq!(report.duplicate_right_keys, 0);
    }

    #[test]
    fn test_duplicate_right_key_fans_out() {
        let left = sales(&[(1, 5, 10.0), (2, 5, 30.0)]);
        let right = features(&[
            (Value::Int(1), 5, 40.0),
            (Value::Int(1), 5, 42.0),
            (Value::Int(2), 5, 41.0),
        ]);

        let (joined, report) = left_join(&left, &right, &BY_STORE_DATE).unwrap();
        assert_eq!(joined.len(), 3);
        assert!(report.has_fan_out());
        assert_eq!(report.fan_out(), 1);
        assert_eq!(report.duplicate_right_keys, 1);
    }

    // -------------------------------------------------------------------------
    // COLUMNS AND NULLS
    // -------------------------------------------------------------------------

    #[test]
    fn test_output_columns_drop_shared_key_and_prefix_collisions() {
        let left = sales(&[(1, 5, 10.0)]);
        let right = features(&[(Value::Int(1), 5, 40.0)]);

        let (joined, _) = left_join(&left, &right, &BY_STORE_DATE).unwrap();
        assert_eq!(
            joined.schema.names(),
            vec![
                "store",
                "sale_date",
                "weekly_sales",
                "is_holiday",
                "feature_date",
                "temperature",
                "feature_is_holiday"
            ]
        );
        assert!(joined.schema.columns[4..].iter().all(|c| c.nullable));
        assert_eq!(joined.rows[0][5], Value::Float(40.0));
        assert_eq!(joined.rows[0][6], Value::Bool(true));
    }

    #[test]
    fn test_unmatched_rows_are_null_filled() {
        let left = sales(&[(9, 5, 10.0)]);
        let right = features(&[(Value::Int(1), 5, 40.0)]);

        let (joined, report) = left_join(&left, &right, &BY_STORE_DATE).unwrap();
        assert_eq!(report.unmatched_left_rows, 1);
        assert_eq!(joined.rows[0][0], Value::Int(9));
        assert!(joined.rows[0][4..].iter().all(Value::is_null));
    }

    #[test]
    fn test_null_keys_never_match() {
        let left = sales(&[(1, 5, 10.0)]);
        let right = features(&[(Value::Null, 5, 40.0)]);

        let (joined, report) = left_join(&left, &right, &BY_STORE_DATE).unwrap();
        assert_eq!(report.unmatched_left_rows, 1);
        assert!(joined.rows[0][5].is_null());
    }

    #[test]
    fn test_empty_right_side_keeps_every_left_row() {
        let left = sales(&[(1, 5, 10.0), (2, 5, 30.0)]);
        let right = features(&[]);

        let (joined, report) = left_join(&left, &right, &BY_STORE_DATE).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(report.unmatched_left_rows, 2);
        assert_eq!(report.right_rows, 0);
    }

    #[test]
    fn test_missing_key_column_is_an_error() {
        let left = sales(&[(1, 5, 10.0)]);
        let right = features(&[]);
        let spec = JoinSpec {
            right_name: "features",
            keys: &[("dept", "store")],
            collision_prefix: "feature_",
        };
        let err = left_join(&left, &right, &spec).unwrap_err();
        assert!(err.to_string().contains("dept"));
    }
}
