//! Validation spec model.
//!
//! A [`ValidationSpec`] is the immutable, declarative description of what to
//! compare on each side. Construction goes through [`ValidationSpecBuilder`],
//! which checks every shape invariant and aggregates all violations into one
//! `SpecInvalid` error — a user fixing a spec sees the whole list at once.
//! Schema-dependent checks (column resolution, PK nullability, filter
//! columns) need both backends and run at planning time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ReckonError, Result};
use crate::query::{AggregateFunction, Predicate, TableRef};
use crate::types::LogicalType;

/// The four validation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    /// Aggregate one value per column (per group) and compare.
    Column,
    /// Compare a per-row fingerprint keyed by primary keys.
    Row,
    /// Compare column sets and logical types only.
    Schema,
    /// User-supplied SQL on each side.
    CustomQuery,
}

impl ValidationKind {
    /// Label carried into the result's `validation_type` column.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Column => "column",
            Self::Row => "row",
            Self::Schema => "schema",
            Self::CustomQuery => "custom_query",
        }
    }
}

/// What one side of a validation reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    /// A qualified physical table.
    Table(TableRef),
    /// Raw SQL text (custom-query validation).
    Sql(String),
}

impl SourceTable {
    /// Display form for result metadata and logs.
    pub fn display_name(&self) -> String {
        match self {
            Self::Table(t) => t.display_name(),
            Self::Sql(_) => "custom_query".to_string(),
        }
    }
}

/// One aggregate to compute and compare in column validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    /// `None` only for `count(*)`.
    pub source_column: Option<String>,
    /// Defaults to `source_column` when omitted.
    pub target_column: Option<String>,
    /// Output alias; also the alignment label in the result.
    pub field_alias: String,
    /// Optional explicit cast applied before aggregation.
    pub cast: Option<LogicalType>,
}

impl AggregateSpec {
    /// A `count(*)` aggregate.
    pub fn count_star(alias: impl Into<String>) -> Self {
        Self {
            function: AggregateFunction::Count,
            source_column: None,
            target_column: None,
            field_alias: alias.into(),
            cast: None,
        }
    }

    /// An aggregate over one column, same name on both sides.
    pub fn over(
        function: AggregateFunction,
        column: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        let column = column.into();
        Self {
            function,
            source_column: Some(column.clone()),
            target_column: Some(column),
            field_alias: alias.into(),
            cast: None,
        }
    }

    /// The target column after defaulting.
    pub fn resolved_target_column(&self) -> Option<&str> {
        self.target_column
            .as_deref()
            .or(self.source_column.as_deref())
    }
}

/// One column canonicalised through the calculated-field ladder for row
/// validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcField {
    /// Field name; also the source column unless overridden.
    pub name: String,
    /// Defaults to `name` when omitted.
    pub source_column: Option<String>,
    /// Defaults to the source column when omitted.
    pub target_column: Option<String>,
}

impl CalcField {
    /// A field reading the same column on both sides.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_column: None,
            target_column: None,
        }
    }

    /// The source column after defaulting.
    pub fn resolved_source_column(&self) -> &str {
        self.source_column.as_deref().unwrap_or(&self.name)
    }

    /// The target column after defaulting.
    pub fn resolved_target_column(&self) -> &str {
        self.target_column
            .as_deref()
            .unwrap_or_else(|| self.resolved_source_column())
    }
}

/// Numeric and string comparison slack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Absolute numeric tolerance.
    pub abs_tol: f64,
    /// Relative numeric tolerance, as a fraction of the larger magnitude.
    pub rel_tol: f64,
    /// Trim trailing whitespace from strings before comparison.
    pub trim_strings: bool,
    /// Upper-case strings before comparison.
    pub case_insensitive: bool,
    /// Whether null compares equal to null.
    pub null_equals_null: bool,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs_tol: 0.0,
            rel_tol: 0.0,
            trim_strings: true,
            case_insensitive: false,
            null_equals_null: true,
        }
    }
}

/// The immutable user-level validation declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSpec {
    pub name: String,
    pub kind: ValidationKind,
    pub source: SourceTable,
    pub target: SourceTable,
    pub aggregates: Vec<AggregateSpec>,
    pub calculated_fields: Vec<CalcField>,
    pub primary_keys: Vec<String>,
    pub grouped_columns: Vec<String>,
    pub filters: Vec<Predicate>,
    pub tolerances: Tolerances,
    /// Opaque tags carried through to the result. Ordered so result
    /// serialisation is deterministic.
    pub labels: BTreeMap<String, String>,
}

impl ValidationSpec {
    /// Starts a builder for the given validation name and kind.
    pub fn builder(name: impl Into<String>, kind: ValidationKind) -> ValidationSpecBuilder {
        ValidationSpecBuilder::new(name, kind)
    }
}

/// Builder for [`ValidationSpec`]; `build` aggregates every violation.
#[derive(Debug, Clone)]
pub struct ValidationSpecBuilder {
    spec: ValidationSpec,
}

impl ValidationSpecBuilder {
    fn new(name: impl Into<String>, kind: ValidationKind) -> Self {
        Self {
            spec: ValidationSpec {
                name: name.into(),
                kind,
                source: SourceTable::Table(TableRef::new("")),
                target: SourceTable::Table(TableRef::new("")),
                aggregates: Vec::new(),
                calculated_fields: Vec::new(),
                primary_keys: Vec::new(),
                grouped_columns: Vec::new(),
                filters: Vec::new(),
                tolerances: Tolerances::default(),
                labels: BTreeMap::new(),
            },
        }
    }

    /// Sets the source table.
    pub fn source_table(mut self, table: TableRef) -> Self {
        self.spec.source = SourceTable::Table(table);
        self
    }

    /// Sets the target table.
    pub fn target_table(mut self, table: TableRef) -> Self {
        self.spec.target = SourceTable::Table(table);
        self
    }

    /// Sets a custom SQL source.
    pub fn source_sql(mut self, sql: impl Into<String>) -> Self {
        self.spec.source = SourceTable::Sql(sql.into());
        self
    }

    /// Sets a custom SQL target.
    pub fn target_sql(mut self, sql: impl Into<String>) -> Self {
        self.spec.target = SourceTable::Sql(sql.into());
        self
    }

    /// Appends an aggregate.
    pub fn aggregate(mut self, aggregate: AggregateSpec) -> Self {
        self.spec.aggregates.push(aggregate);
        self
    }

    /// Appends a calculated field.
    pub fn calculated_field(mut self, field: CalcField) -> Self {
        self.spec.calculated_fields.push(field);
        self
    }

    /// Sets the primary keys used to align rows.
    pub fn primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the grouping columns for aggregate partitioning.
    pub fn grouped_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.grouped_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a filter applied uniformly to both sides.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.spec.filters.push(predicate);
        self
    }

    /// Sets the tolerances.
    pub fn tolerances(mut self, tolerances: Tolerances) -> Self {
        self.spec.tolerances = tolerances;
        self
    }

    /// Adds an opaque label carried into the result.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Validates the shape invariants and produces the immutable spec.
    pub fn build(self) -> Result<ValidationSpec> {
        let spec = self.spec;
        let mut violations = Vec::new();

        if spec.name.trim().is_empty() {
            violations.push("validation name must be non-empty".to_string());
        }

        match spec.kind {
            ValidationKind::Column => {
                if spec.aggregates.is_empty() {
                    violations
                        .push("aggregates must be non-empty for column validation".to_string());
                }
                if !spec.calculated_fields.is_empty() {
                    violations.push(
                        "calculated_fields are only valid for row validation".to_string(),
                    );
                }
            }
            ValidationKind::Row => {
                if spec.calculated_fields.is_empty() {
                    violations.push(
                        "calculated_fields must be non-empty for row validation".to_string(),
                    );
                }
                if spec.primary_keys.is_empty() {
                    violations.push("primary_keys are required for row validation".to_string());
                }
                if !spec.aggregates.is_empty() {
                    violations.push("aggregates are only valid for column validation".to_string());
                }
            }
            ValidationKind::Schema => {
                if !spec.aggregates.is_empty() || !spec.calculated_fields.is_empty() {
                    violations.push(
                        "schema validation takes neither aggregates nor calculated_fields"
                            .to_string(),
                    );
                }
            }
            ValidationKind::CustomQuery => {
                let source_is_sql = matches!(spec.source, SourceTable::Sql(_));
                let target_is_sql = matches!(spec.target, SourceTable::Sql(_));
                if !source_is_sql || !target_is_sql {
                    violations.push(
                        "custom_query validation requires SQL text on both sides".to_string(),
                    );
                }
            }
        }

        for agg in &spec.aggregates {
            if agg.source_column.is_none() && agg.function != AggregateFunction::Count {
                violations.push(format!(
                    "aggregate '{}' omits a column but is not count(*)",
                    agg.field_alias
                ));
            }
            if agg.field_alias.trim().is_empty() {
                violations.push("aggregate field_alias must be non-empty".to_string());
            }
        }

        if let SourceTable::Table(t) = &spec.source {
            if t.name.is_empty() && spec.kind != ValidationKind::CustomQuery {
                violations.push("source table must be set".to_string());
            }
        }
        if let SourceTable::Table(t) = &spec.target {
            if t.name.is_empty() && spec.kind != ValidationKind::CustomQuery {
                violations.push("target table must be set".to_string());
            }
        }

        if spec.tolerances.abs_tol < 0.0 || spec.tolerances.rel_tol < 0.0 {
            violations.push("tolerances must be non-negative".to_string());
        }

        if violations.is_empty() {
            Ok(spec)
        } else {
            Err(ReckonError::spec_invalid(violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_spec_requires_aggregates() {
        let err = ValidationSpec::builder("orders_count", ValidationKind::Column)
            .source_table(TableRef::new("orders"))
            .target_table(TableRef::new("orders"))
            .build()
            .unwrap_err();
        match err {
            ReckonError::SpecInvalid { violations } => {
                assert!(violations
                    .iter()
                    .any(|v| v.contains("aggregates must be non-empty")));
            }
            other => panic!("expected SpecInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_violations_are_aggregated() {
        let err = ValidationSpec::builder("", ValidationKind::Row)
            .source_table(TableRef::new("t"))
            .target_table(TableRef::new("t"))
            .build()
            .unwrap_err();
        match err {
            ReckonError::SpecInvalid { violations } => {
                // Empty name, missing calculated_fields, missing primary keys.
                assert!(violations.len() >= 3);
            }
            other => panic!("expected SpecInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_target_column_defaults_to_source() {
        let agg = AggregateSpec {
            function: AggregateFunction::Sum,
            source_column: Some("amount".to_string()),
            target_column: None,
            field_alias: "sum_amount".to_string(),
            cast: None,
        };
        assert_eq!(agg.resolved_target_column(), Some("amount"));

        let field = CalcField::new("name");
        assert_eq!(field.resolved_source_column(), "name");
        assert_eq!(field.resolved_target_column(), "name");
    }

    #[test]
    fn test_count_star_needs_no_column() {
        let spec = ValidationSpec::builder("counts", ValidationKind::Column)
            .source_table(TableRef::new("orders"))
            .target_table(TableRef::new("orders_copy"))
            .aggregate(AggregateSpec::count_star("row_count"))
            .build()
            .unwrap();
        assert_eq!(spec.aggregates.len(), 1);
        assert!(spec.aggregates[0].source_column.is_none());
    }

    #[test]
    fn test_non_count_aggregate_requires_column() {
        let err = ValidationSpec::builder("sums", ValidationKind::Column)
            .source_table(TableRef::new("orders"))
            .target_table(TableRef::new("orders"))
            .aggregate(AggregateSpec {
                function: AggregateFunction::Sum,
                source_column: None,
                target_column: None,
                field_alias: "sum_amount".to_string(),
                cast: None,
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("is not count(*)"));
    }

    #[test]
    fn test_custom_query_requires_sql_both_sides() {
        let err = ValidationSpec::builder("cq", ValidationKind::CustomQuery)
            .source_sql("SELECT 1 AS one")
            .target_table(TableRef::new("t"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("SQL text on both sides"));
    }

    #[test]
    fn test_spec_round_trips_through_serde() {
        let spec = ValidationSpec::builder("roundtrip", ValidationKind::Column)
            .source_table(TableRef::qualified("sales", "orders"))
            .target_table(TableRef::qualified("sales_dw", "orders"))
            .aggregate(AggregateSpec::over(
                AggregateFunction::Sum,
                "amount",
                "sum_amount",
            ))
            .grouped_columns(["region"])
            .label("env", "prod")
            .build()
            .unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let back: ValidationSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
