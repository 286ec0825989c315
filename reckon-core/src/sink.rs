//! Result handlers.
//!
//! A [`ResultHandler`] receives the canonical result table for one run and
//! does whatever a deployment needs — print it, ship it, store it. The core
//! imposes nothing beyond the interface; handlers return the table so they
//! compose.

use std::fmt::Write as _;
use tracing::info;

use crate::error::{ReckonError, Result};
use crate::result::{ResultTable, ValidationStatus};
use crate::spec::ValidationSpec;

/// Handles the result table of one validation run.
pub trait ResultHandler: Send + Sync {
    /// Processes the result, returning it (possibly annotated) for the next
    /// handler.
    fn handle(&self, table: &ResultTable, spec: &ValidationSpec) -> Result<ResultTable>;
}

/// Options for the text printer.
#[derive(Debug, Clone)]
pub struct PrintOptions {
    /// Print every row, or only non-success rows.
    pub failures_only: bool,
    /// Hard cap on printed rows; the remainder is summarised.
    pub max_rows: usize,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            failures_only: false,
            max_rows: 200,
        }
    }
}

/// Default handler: renders a compact text report to stdout.
#[derive(Debug, Clone, Default)]
pub struct StdoutHandler {
    options: PrintOptions,
}

impl StdoutHandler {
    /// A printer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// A printer with explicit options.
    pub fn with_options(options: PrintOptions) -> Self {
        Self { options }
    }

    /// Renders the report without printing; used by tests and callers that
    /// want the text.
    pub fn render(&self, table: &ResultTable, spec: &ValidationSpec) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "validation '{}' ({}): {} rows, {} success / {} fail / {} source_only / {} target_only",
            spec.name,
            spec.kind.label(),
            table.len(),
            table.count_status(ValidationStatus::Success),
            table.count_status(ValidationStatus::Fail),
            table.count_status(ValidationStatus::SourceOnly),
            table.count_status(ValidationStatus::TargetOnly),
        );

        let mut printed = 0usize;
        for row in table.rows() {
            if self.options.failures_only && row.validation_status == ValidationStatus::Success {
                continue;
            }
            if printed >= self.options.max_rows {
                let _ = writeln!(out, "  … ({} more rows)", table.len() - printed);
                break;
            }
            let label = row
                .aggregation_type
                .as_deref()
                .or(row.source_column_name.as_deref())
                .unwrap_or("-");
            let group = row.group_by_columns.as_deref().unwrap_or("-");
            let _ = writeln!(
                out,
                "  [{}] {} group={} source={} target={} diff={}",
                row.validation_status.label(),
                label,
                group,
                row.source_agg_value.as_deref().unwrap_or("NULL"),
                row.target_agg_value.as_deref().unwrap_or("NULL"),
                row.difference
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            );
            printed += 1;
        }
        out
    }
}

impl ResultHandler for StdoutHandler {
    fn handle(&self, table: &ResultTable, spec: &ValidationSpec) -> Result<ResultTable> {
        print!("{}", self.render(table, spec));
        Ok(table.clone())
    }
}

/// Handler that serialises the result rows as one JSON document.
#[derive(Debug, Clone, Default)]
pub struct JsonHandler;

impl JsonHandler {
    /// Serialises the table to a JSON string.
    pub fn render(&self, table: &ResultTable) -> Result<String> {
        serde_json::to_string_pretty(table.rows())
            .map_err(|e| ReckonError::Serialization(e.to_string()))
    }
}

impl ResultHandler for JsonHandler {
    fn handle(&self, table: &ResultTable, spec: &ValidationSpec) -> Result<ResultTable> {
        let rendered = self.render(table)?;
        info!(validation = %spec.name, "emitting JSON result");
        println!("{rendered}");
        Ok(table.clone())
    }
}
