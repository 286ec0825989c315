//! Labeled in-memory tables.
//!
//! A [`Table`] is the two-dimensional labeled result every backend returns
//! from `execute`: ordered column names plus rows of [`Value`] cells. Column
//! labels are unified to lower-case so aligned results are case-stable
//! regardless of either backend's identifier folding.

use arrow::array::{
    Array, BinaryArray, BooleanArray, Date32Array, Date64Array, Decimal128Array, Float32Array,
    Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, LargeBinaryArray,
    LargeStringArray, StringArray, StringViewArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::error::{ReckonError, Result};
use crate::value::{compare_keys, Value};

/// A two-dimensional labeled result table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Creates a table from lower-cased column labels and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns = columns.into_iter().map(|c| c.to_lowercase()).collect();
        Self { columns, rows }
    }

    /// Column labels, in projection order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column label (case-insensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let lower = name.to_lowercase();
        self.columns.iter().position(|c| *c == lower)
    }

    /// Indices for a list of column labels, failing on the first absentee.
    pub fn column_indices(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                self.column_index(n).ok_or_else(|| {
                    ReckonError::Internal(format!("result column '{n}' missing from table"))
                })
            })
            .collect()
    }

    /// Sorts rows in place by the given key column indices.
    pub fn sort_by_keys(&mut self, key_idx: &[usize]) {
        self.rows.sort_by(|a, b| compare_keys(a, b, key_idx));
    }

    /// Consumes the table, returning its rows.
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Builds a table from collected Arrow record batches.
    pub fn from_batches(batches: &[RecordBatch]) -> Result<Self> {
        let Some(first) = batches.first() else {
            return Ok(Self::default());
        };
        let columns: Vec<String> = first
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().to_lowercase())
            .collect();

        let mut rows = Vec::new();
        for batch in batches {
            let converted: Vec<Vec<Value>> = (0..batch.num_columns())
                .map(|c| column_values(batch.column(c)))
                .collect::<Result<_>>()?;
            for r in 0..batch.num_rows() {
                rows.push(converted.iter().map(|col| col[r].clone()).collect());
            }
        }
        Ok(Self { columns, rows })
    }
}

macro_rules! extract {
    ($array:expr, $arrow_ty:ty, $n:expr, $map:expr) => {{
        let typed = $array
            .as_any()
            .downcast_ref::<$arrow_ty>()
            .ok_or_else(|| ReckonError::Internal("array downcast mismatch".to_string()))?;
        (0..$n)
            .map(|i| {
                if typed.is_null(i) {
                    Ok(Value::Null)
                } else {
                    $map(typed.value(i))
                }
            })
            .collect::<Result<Vec<Value>>>()
    }};
}

/// Converts one Arrow array into a column of values.
///
/// Timestamps are normalised to UTC here; a timezone on the Arrow type only
/// affects interpretation of the stored instant, which is already UTC-based
/// in Arrow's encoding.
fn column_values(array: &dyn Array) -> Result<Vec<Value>> {
    let n = array.len();
    match array.data_type() {
        DataType::Boolean => extract!(array, BooleanArray, n, |v| Ok(Value::Bool(v))),
        DataType::Int8 => extract!(array, Int8Array, n, |v| Ok(Value::Int(v as i64))),
        DataType::Int16 => extract!(array, Int16Array, n, |v| Ok(Value::Int(v as i64))),
        DataType::Int32 => extract!(array, Int32Array, n, |v| Ok(Value::Int(v as i64))),
        DataType::Int64 => extract!(array, Int64Array, n, |v| Ok(Value::Int(v))),
        DataType::UInt32 => extract!(array, UInt32Array, n, |v| Ok(Value::Int(v as i64))),
        DataType::UInt64 => extract!(array, UInt64Array, n, |v: u64| {
            i64::try_from(v)
                .map(Value::Int)
                .map_err(|_| ReckonError::Internal("uint64 value exceeds int64".to_string()))
        }),
        DataType::Float32 => extract!(array, Float32Array, n, |v| Ok(Value::Float(v as f64))),
        DataType::Float64 => extract!(array, Float64Array, n, |v| Ok(Value::Float(v))),
        DataType::Decimal128(_, scale) => {
            let scale = *scale;
            extract!(array, Decimal128Array, n, |v| Ok(Value::Decimal {
                unscaled: v,
                scale,
            }))
        }
        DataType::Utf8 => extract!(array, StringArray, n, |v: &str| Ok(Value::Str(
            v.to_string()
        ))),
        DataType::LargeUtf8 => extract!(array, LargeStringArray, n, |v: &str| Ok(Value::Str(
            v.to_string()
        ))),
        DataType::Utf8View => extract!(array, StringViewArray, n, |v: &str| Ok(Value::Str(
            v.to_string()
        ))),
        DataType::Binary => extract!(array, BinaryArray, n, |v: &[u8]| Ok(Value::Bytes(
            v.to_vec()
        ))),
        DataType::LargeBinary => extract!(array, LargeBinaryArray, n, |v: &[u8]| Ok(
            Value::Bytes(v.to_vec())
        )),
        DataType::Date32 => extract!(array, Date32Array, n, |v: i32| Ok(Value::Date(
            epoch_date() + Duration::days(v as i64)
        ))),
        DataType::Date64 => extract!(array, Date64Array, n, |v: i64| Ok(Value::Date(
            epoch_date() + Duration::days(Duration::milliseconds(v).num_days())
        ))),
        DataType::Timestamp(unit, _tz) => timestamp_values(array, unit, n),
        DataType::Null => Ok(vec![Value::Null; n]),
        other => Err(ReckonError::Internal(format!(
            "unsupported result array type: {other:?}"
        ))),
    }
}

fn timestamp_values(array: &dyn Array, unit: &TimeUnit, n: usize) -> Result<Vec<Value>> {
    let to_ts = |micros: i64| -> Result<Value> {
        Utc.timestamp_micros(micros)
            .single()
            .map(Value::Timestamp)
            .ok_or_else(|| ReckonError::Internal("timestamp out of range".to_string()))
    };
    match unit {
        TimeUnit::Second => extract!(array, TimestampSecondArray, n, |v: i64| to_ts(
            v * 1_000_000
        )),
        TimeUnit::Millisecond => extract!(array, TimestampMillisecondArray, n, |v: i64| to_ts(
            v * 1_000
        )),
        TimeUnit::Microsecond => extract!(array, TimestampMicrosecondArray, n, to_ts),
        TimeUnit::Nanosecond => extract!(array, TimestampNanosecondArray, n, |v: i64| to_ts(
            v / 1_000
        )),
    }
}

fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date is valid")
}

/// Converts a UTC timestamp value to its date by truncation.
pub fn truncate_to_date(ts: &DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ID", DataType::Int64, false),
            Field::new("Name", DataType::Utf8, true),
            Field::new("amount", DataType::Float64, true),
        ]));
        let id: ArrayRef = Arc::new(Int64Array::from(vec![2, 1]));
        let name: ArrayRef = Arc::new(StringArray::from(vec![Some("Grace"), None]));
        let amount: ArrayRef = Arc::new(Float64Array::from(vec![Some(9.5), Some(1.25)]));
        RecordBatch::try_new(schema, vec![id, name, amount]).unwrap()
    }

    #[test]
    fn test_from_batches_lowercases_labels() {
        let table = Table::from_batches(&[sample_batch()]).unwrap();
        assert_eq!(table.columns(), &["id", "name", "amount"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0][1], Value::Str("Grace".into()));
        assert!(table.rows()[1][1].is_null());
    }

    #[test]
    fn test_empty_batches_make_empty_table() {
        let table = Table::from_batches(&[]).unwrap();
        assert!(table.is_empty());
        assert!(table.columns().is_empty());
    }

    #[test]
    fn test_sort_by_keys() {
        let mut table = Table::from_batches(&[sample_batch()]).unwrap();
        table.sort_by_keys(&[0]);
        assert_eq!(table.rows()[0][0], Value::Int(1));
        assert_eq!(table.rows()[1][0], Value::Int(2));
    }

    #[test]
    fn test_column_index_is_case_insensitive() {
        let table = Table::from_batches(&[sample_batch()]).unwrap();
        assert_eq!(table.column_index("ID"), Some(0));
        assert_eq!(table.column_index("missing"), None);
    }
}
