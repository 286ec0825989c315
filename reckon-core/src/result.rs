//! Canonical validation result schema.
//!
//! Every run produces a [`ResultTable`] with the fixed, ordered column set in
//! [`RESULT_COLUMNS`]. Result handlers receive this table and nothing else;
//! anything a sink needs travels in these columns or in the labels map.

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// Ordered columns of the canonical result table.
pub const RESULT_COLUMNS: [&str; 17] = [
    "validation_name",
    "validation_type",
    "aggregation_type",
    "source_table_name",
    "target_table_name",
    "source_column_name",
    "target_column_name",
    "group_by_columns",
    "source_agg_value",
    "target_agg_value",
    "difference",
    "pct_difference",
    "validation_status",
    "run_id",
    "start_time",
    "end_time",
    "labels",
];

static RUN_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

/// Issues the next monotonic run identifier, unique per coordinator
/// invocation within this process.
pub fn next_run_id() -> u64 {
    RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Classification of one aligned comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Success,
    Fail,
    SourceOnly,
    TargetOnly,
}

impl ValidationStatus {
    /// Lower-case label used in the result column.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
            Self::SourceOnly => "source_only",
            Self::TargetOnly => "target_only",
        }
    }

    /// The mirrored status when source and target are swapped.
    pub fn swapped(&self) -> Self {
        match self {
            Self::SourceOnly => Self::TargetOnly,
            Self::TargetOnly => Self::SourceOnly,
            other => *other,
        }
    }
}

/// One row of the canonical result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub validation_name: String,
    pub validation_type: String,
    pub aggregation_type: Option<String>,
    pub source_table_name: String,
    pub target_table_name: String,
    pub source_column_name: Option<String>,
    pub target_column_name: Option<String>,
    /// JSON object of group key values, `None` for ungrouped validations.
    pub group_by_columns: Option<String>,
    pub source_agg_value: Option<String>,
    pub target_agg_value: Option<String>,
    pub difference: Option<f64>,
    pub pct_difference: Option<f64>,
    pub validation_status: ValidationStatus,
    pub run_id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
}

/// The canonical result table for one validation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
}

impl ResultTable {
    /// Builds a table from classified rows.
    pub fn new(rows: Vec<ResultRow>) -> Self {
        Self { rows }
    }

    /// All rows, in the deterministic run ordering.
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Number of result rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the run produced no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when every row classified as success.
    pub fn all_succeeded(&self) -> bool {
        self.rows
            .iter()
            .all(|r| r.validation_status == ValidationStatus::Success)
    }

    /// Count of rows with the given status.
    pub fn count_status(&self, status: ValidationStatus) -> usize {
        self.rows
            .iter()
            .filter(|r| r.validation_status == status)
            .count()
    }

    /// Exports the table as a single Arrow record batch for downstream
    /// handlers.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("validation_name", DataType::Utf8, false),
            Field::new("validation_type", DataType::Utf8, false),
            Field::new("aggregation_type", DataType::Utf8, true),
            Field::new("source_table_name", DataType::Utf8, false),
            Field::new("target_table_name", DataType::Utf8, false),
            Field::new("source_column_name", DataType::Utf8, true),
            Field::new("target_column_name", DataType::Utf8, true),
            Field::new("group_by_columns", DataType::Utf8, true),
            Field::new("source_agg_value", DataType::Utf8, true),
            Field::new("target_agg_value", DataType::Utf8, true),
            Field::new("difference", DataType::Float64, true),
            Field::new("pct_difference", DataType::Float64, true),
            Field::new("validation_status", DataType::Utf8, false),
            Field::new("run_id", DataType::UInt64, false),
            Field::new("start_time", DataType::Utf8, false),
            Field::new("end_time", DataType::Utf8, false),
            Field::new("labels", DataType::Utf8, true),
        ]));

        let strings = |f: &dyn Fn(&ResultRow) -> Option<String>| -> ArrayRef {
            Arc::new(StringArray::from(
                self.rows.iter().map(f).collect::<Vec<_>>(),
            ))
        };

        let columns: Vec<ArrayRef> = vec![
            strings(&|r| Some(r.validation_name.clone())),
            strings(&|r| Some(r.validation_type.clone())),
            strings(&|r| r.aggregation_type.clone()),
            strings(&|r| Some(r.source_table_name.clone())),
            strings(&|r| Some(r.target_table_name.clone())),
            strings(&|r| r.source_column_name.clone()),
            strings(&|r| r.target_column_name.clone()),
            strings(&|r| r.group_by_columns.clone()),
            strings(&|r| r.source_agg_value.clone()),
            strings(&|r| r.target_agg_value.clone()),
            Arc::new(Float64Array::from(
                self.rows.iter().map(|r| r.difference).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                self.rows
                    .iter()
                    .map(|r| r.pct_difference)
                    .collect::<Vec<_>>(),
            )),
            strings(&|r| Some(r.validation_status.label().to_string())),
            Arc::new(UInt64Array::from(
                self.rows.iter().map(|r| r.run_id).collect::<Vec<_>>(),
            )),
            strings(&|r| {
                Some(r.start_time.to_rfc3339_opts(SecondsFormat::Micros, true))
            }),
            strings(&|r| Some(r.end_time.to_rfc3339_opts(SecondsFormat::Micros, true))),
            strings(&|r| serde_json::to_string(&r.labels).ok()),
        ];

        Ok(RecordBatch::try_new(schema, columns)?)
    }
}
