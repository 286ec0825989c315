//! Engine-neutral cell values.
//!
//! Backends materialize query results into [`Value`] cells so that the
//! aligner and classifier never touch engine-specific arrays. `Value` carries
//! a total ordering (nulls first, then by variant, then by content) so rows
//! can be key-sorted deterministically on any mix of key types.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::types::COMPARE_DECIMAL_SCALE;

/// A single cell in a labeled result table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Fixed-point decimal as unscaled digits plus scale.
    Decimal {
        unscaled: i128,
        scale: i8,
    },
    Str(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    /// Timestamps are always normalised to UTC on ingest.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Returns true for the null cell.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the cell as `f64`, when it has one.
    ///
    /// Used for the `difference` / `pct_difference` result columns; exact
    /// comparison happens on the scaled decimal form instead.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Decimal { unscaled, scale } => {
                Some(*unscaled as f64 / 10f64.powi(*scale as i32))
            }
            _ => None,
        }
    }

    /// Rescales any numeric cell to the comparison scale (decimal(38,9)).
    ///
    /// Floats are not rescaled; the coercion rules route all-floating pairs
    /// through `f64` comparison instead.
    pub fn to_compare_decimal(&self) -> Option<i128> {
        let target = COMPARE_DECIMAL_SCALE as i32;
        match self {
            Self::Int(v) => Some(*v as i128 * 10i128.pow(target as u32)),
            Self::Decimal { unscaled, scale } => {
                let shift = target - *scale as i32;
                match shift.cmp(&0) {
                    Ordering::Equal => Some(*unscaled),
                    Ordering::Greater => unscaled.checked_mul(10i128.pow(shift as u32)),
                    Ordering::Less => Some(unscaled / 10i128.pow((-shift) as u32)),
                }
            }
            _ => None,
        }
    }

    /// Canonical string rendering used for result columns and text
    /// comparison. Deterministic: no locale, UTC timestamps, RFC 3339.
    pub fn render(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{v:.1}")
                } else {
                    v.to_string()
                }
            }
            Self::Decimal { unscaled, scale } => render_decimal(*unscaled, *scale),
            Self::Str(v) => v.clone(),
            Self::Bytes(v) => hex(v),
            Self::Date(v) => v.format("%Y-%m-%d").to_string(),
            Self::Timestamp(v) => v.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) | Self::Decimal { .. } => 2,
            Self::Str(_) => 3,
            Self::Bytes(_) => 4,
            Self::Date(_) => 5,
            Self::Timestamp(_) => 6,
        }
    }

    /// Total ordering used for join-key sorting and group alignment.
    ///
    /// Nulls sort first and equal each other, matching SQL `GROUP BY`
    /// semantics where nulls form their own group. Numeric variants compare
    /// against each other by value so an `int64` key on one side aligns with
    /// a `decimal` key on the other.
    pub fn key_cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (a, b) if a.variant_rank() == 2 && b.variant_rank() == 2 => numeric_cmp(a, b),
            (a, b) => a.variant_rank().cmp(&b.variant_rank()),
        }
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.to_compare_decimal(), b.to_compare_decimal()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => {
            let x = a.as_f64().unwrap_or(f64::NAN);
            let y = b.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
    }
}

fn render_decimal(unscaled: i128, scale: i8) -> String {
    if scale <= 0 {
        let shifted = unscaled * 10i128.pow((-scale) as u32);
        return shifted.to_string();
    }
    let divisor = 10i128.pow(scale as u32);
    let sign = if unscaled < 0 { "-" } else { "" };
    let abs = unscaled.unsigned_abs();
    let int_part = abs / divisor.unsigned_abs();
    let frac_part = abs % divisor.unsigned_abs();
    format!(
        "{sign}{int_part}.{frac:0width$}",
        frac = frac_part,
        width = scale as usize
    )
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.key_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.key_cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_cmp(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Compares two rows on a key column index list.
pub fn compare_keys(a: &[Value], b: &[Value], key_idx: &[usize]) -> Ordering {
    for &i in key_idx {
        let ord = a[i].key_cmp(&b[i]);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nulls_sort_first_and_equal_each_other() {
        assert_eq!(Value::Null.key_cmp(&Value::Null), Ordering::Equal);
        assert_eq!(Value::Null.key_cmp(&Value::Int(-5)), Ordering::Less);
        assert_eq!(Value::Str("a".into()).key_cmp(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn test_cross_variant_numeric_keys_align() {
        let int_key = Value::Int(42);
        let dec_key = Value::Decimal {
            unscaled: 42_000_000_000,
            scale: 9,
        };
        assert_eq!(int_key.key_cmp(&dec_key), Ordering::Equal);
        assert_eq!(int_key, dec_key);
    }

    #[test]
    fn test_compare_decimal_rescaling() {
        let cents = Value::Decimal {
            unscaled: 1234567,
            scale: 2,
        };
        assert_eq!(cents.to_compare_decimal(), Some(12345_670_000_000i128));
        assert_eq!(Value::Int(3).to_compare_decimal(), Some(3_000_000_000i128));
    }

    #[test]
    fn test_decimal_rendering() {
        let v = Value::Decimal {
            unscaled: -1205,
            scale: 2,
        };
        assert_eq!(v.render(), "-12.05");
        let whole = Value::Decimal {
            unscaled: 7,
            scale: 0,
        };
        assert_eq!(whole.render(), "7");
    }

    #[test]
    fn test_timestamp_renders_utc_rfc3339() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T12:00:00.5+02:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Value::Timestamp(ts).render(), "2024-03-01T10:00:00.500000Z");
    }

    #[test]
    fn test_compare_keys_is_lexicographic() {
        let a = vec![Value::Int(1), Value::Str("b".into())];
        let b = vec![Value::Int(1), Value::Str("c".into())];
        assert_eq!(compare_keys(&a, &b, &[0]), Ordering::Equal);
        assert_eq!(compare_keys(&a, &b, &[0, 1]), Ordering::Less);
    }
}
