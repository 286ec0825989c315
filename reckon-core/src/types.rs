//! Unified logical type model and coercion rules.
//!
//! Every backend reports its schema in terms of [`LogicalType`]; the planner
//! decides comparability from the symmetric matrix implemented by
//! [`comparison_type`]. Pairs outside the matrix fail planning with
//! `TypeMismatch` — execution never sees an incomparable pair.

use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ReckonError, Result};

/// Precision used when two numeric columns are coerced for comparison.
pub const COMPARE_DECIMAL_PRECISION: u8 = 38;

/// Scale used when two numeric columns are coerced for comparison.
pub const COMPARE_DECIMAL_SCALE: i8 = 9;

/// The unified set of logical column types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal {
        precision: u8,
        scale: i8,
    },
    String,
    Bytes,
    Date,
    Time,
    Timestamp {
        /// Whether the column carries a timezone.
        tz: bool,
    },
    Interval,
    Array(Box<LogicalType>),
    Struct(Vec<(String, LogicalType)>),
    Json,
    Null,
}

impl LogicalType {
    /// Returns true for any integer, float or decimal type.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Float32
                | Self::Float64
                | Self::Decimal { .. }
        )
    }

    /// Returns true for floating point types.
    pub fn is_floating(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Returns true for string and bytes.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::String | Self::Bytes)
    }

    /// Returns true for date and timestamp types.
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Timestamp { .. })
    }

    /// The decimal type every numeric comparison is coerced to.
    pub fn compare_decimal() -> Self {
        Self::Decimal {
            precision: COMPARE_DECIMAL_PRECISION,
            scale: COMPARE_DECIMAL_SCALE,
        }
    }

    /// Maps an Arrow data type to its logical equivalent.
    ///
    /// Unsigned integers widen to the next signed size; dictionary and view
    /// types resolve to their value type.
    pub fn from_arrow(dt: &DataType) -> Result<Self> {
        let ty = match dt {
            DataType::Boolean => Self::Bool,
            DataType::Int8 => Self::Int8,
            DataType::Int16 | DataType::UInt8 => Self::Int16,
            DataType::Int32 | DataType::UInt16 => Self::Int32,
            DataType::Int64 | DataType::UInt32 | DataType::UInt64 => Self::Int64,
            DataType::Float16 | DataType::Float32 => Self::Float32,
            DataType::Float64 => Self::Float64,
            DataType::Decimal128(p, s) => Self::Decimal {
                precision: *p,
                scale: *s,
            },
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => Self::String,
            DataType::Binary | DataType::LargeBinary | DataType::BinaryView => Self::Bytes,
            DataType::Date32 | DataType::Date64 => Self::Date,
            DataType::Time32(_) | DataType::Time64(_) => Self::Time,
            DataType::Timestamp(_, tz) => Self::Timestamp { tz: tz.is_some() },
            DataType::Interval(_) => Self::Interval,
            DataType::List(field) | DataType::LargeList(field) => {
                Self::Array(Box::new(Self::from_arrow(field.data_type())?))
            }
            DataType::Struct(fields) => Self::Struct(
                fields
                    .iter()
                    .map(|f| Ok((f.name().clone(), Self::from_arrow(f.data_type())?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            DataType::Null => Self::Null,
            DataType::Dictionary(_, value) => Self::from_arrow(value)?,
            other => {
                return Err(ReckonError::Internal(format!(
                    "unmapped Arrow type: {other:?}"
                )))
            }
        };
        Ok(ty)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int8 => write!(f, "int8"),
            Self::Int16 => write!(f, "int16"),
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::Float32 => write!(f, "float32"),
            Self::Float64 => write!(f, "float64"),
            Self::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            Self::String => write!(f, "string"),
            Self::Bytes => write!(f, "bytes"),
            Self::Date => write!(f, "date"),
            Self::Time => write!(f, "time"),
            Self::Timestamp { tz: true } => write!(f, "timestamp[tz]"),
            Self::Timestamp { tz: false } => write!(f, "timestamp"),
            Self::Interval => write!(f, "interval"),
            Self::Array(inner) => write!(f, "array<{inner}>"),
            Self::Struct(fields) => {
                write!(f, "struct<")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, ">")
            }
            Self::Json => write!(f, "json"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// How an aligned value pair is compared by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Tolerance-aware numeric comparison on the coerced type.
    Numeric,
    /// Byte-equality on the canonical UTF-8 form.
    Text,
    /// Date comparison after timestamp truncation / UTC normalisation.
    Temporal,
}

/// Outcome of resolving a comparable pair of logical types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercedPair {
    /// The type both sides are cast to before comparison.
    pub target: LogicalType,
    /// How the classifier compares the coerced values.
    pub comparison: Comparison,
}

/// Resolves the comparison type for a pair of columns.
///
/// The matrix is symmetric: any two numerics coerce to `decimal(38,9)` unless
/// both are floating (then `float64`); string/bytes compare as UTF-8 strings;
/// date compares to timestamp by truncating the timestamp to date, with
/// timezone-bearing timestamps normalised to UTC first. Any pair outside the
/// matrix is a planning-time `TypeMismatch`.
pub fn comparison_type(
    column: &str,
    source: &LogicalType,
    target: &LogicalType,
) -> Result<CoercedPair> {
    use LogicalType::*;

    if source.is_numeric() && target.is_numeric() {
        let ty = if source.is_floating() && target.is_floating() {
            Float64
        } else {
            LogicalType::compare_decimal()
        };
        return Ok(CoercedPair {
            target: ty,
            comparison: Comparison::Numeric,
        });
    }

    if source.is_text() && target.is_text() {
        return Ok(CoercedPair {
            target: String,
            comparison: Comparison::Text,
        });
    }

    if source.is_temporal() && target.is_temporal() {
        // A date on either side truncates the other side's timestamp.
        let ty = match (source, target) {
            (Timestamp { .. }, Timestamp { .. }) => Timestamp { tz: false },
            _ => Date,
        };
        return Ok(CoercedPair {
            target: ty,
            comparison: Comparison::Temporal,
        });
    }

    // Identical non-scalar or exotic types (bool, json, arrays, structs)
    // compare on their canonical text rendering.
    if source == target {
        return Ok(CoercedPair {
            target: source.clone(),
            comparison: Comparison::Text,
        });
    }

    Err(ReckonError::TypeMismatch {
        column: column.to_string(),
        source_type: source.to_string(),
        target_type: target.to_string(),
    })
}

/// Checks a decimal column against a backend precision cap.
///
/// Returns the truncated type and `true` when the declared precision exceeds
/// the cap; such truncation is recorded as a warning on the result.
pub fn apply_decimal_cap(ty: &LogicalType, cap: u8) -> (LogicalType, bool) {
    match ty {
        LogicalType::Decimal { precision, scale } if *precision > cap => (
            LogicalType::Decimal {
                precision: cap,
                scale: *scale,
            },
            true,
        ),
        other => (other.clone(), false),
    }
}

/// SQL type names for a dialect, declared as a pure data table keyed on the
/// logical type tag. Backends carry one of these instead of registering
/// translation functions.
#[derive(Debug, Clone)]
pub struct TypeMap {
    entries: Vec<(&'static str, &'static str)>,
}

impl TypeMap {
    /// ANSI-flavoured defaults used by the DataFusion dialect.
    pub fn ansi() -> Self {
        Self {
            entries: vec![
                ("bool", "BOOLEAN"),
                ("int8", "TINYINT"),
                ("int16", "SMALLINT"),
                ("int32", "INT"),
                ("int64", "BIGINT"),
                ("float32", "FLOAT"),
                ("float64", "DOUBLE"),
                ("decimal", "DECIMAL"),
                ("string", "VARCHAR"),
                ("bytes", "VARBINARY"),
                ("date", "DATE"),
                ("time", "TIME"),
                ("timestamp", "TIMESTAMP"),
            ],
        }
    }

    /// Overrides one tag's rendering; used by backends with non-ANSI names.
    pub fn with_override(mut self, tag: &'static str, name: &'static str) -> Self {
        if let Some(entry) = self.entries.iter_mut().find(|(t, _)| *t == tag) {
            entry.1 = name;
        } else {
            self.entries.push((tag, name));
        }
        self
    }

    /// Renders the SQL type name for a logical type.
    pub fn sql_name(&self, ty: &LogicalType) -> String {
        let lookup = |tag: &str| -> &'static str {
            self.entries
                .iter()
                .find(|(t, _)| *t == tag)
                .map(|(_, name)| *name)
                .unwrap_or("VARCHAR")
        };
        match ty {
            LogicalType::Decimal { precision, scale } => {
                format!("{}({precision},{scale})", lookup("decimal"))
            }
            LogicalType::Timestamp { .. } => lookup("timestamp").to_string(),
            other => lookup(&other.to_string()).to_string(),
        }
    }
}
