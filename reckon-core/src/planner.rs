//! Query planner.
//!
//! Turns a validated [`ValidationSpec`] plus two backend handles into a
//! [`ValidationPlan`]: one logical query (or schema fetch) per side, the join
//! keys for alignment, and per-value-column metadata the classifier needs.
//! Everything type-related fails here — execution never sees an incomparable
//! pair, a missing column or an unsupported aggregate.

use tracing::{debug, instrument};

use crate::backend::{Backend, TableSchema};
use crate::error::{ReckonError, Result};
use crate::pipeline::{build_ladder, fingerprint_expr, HASH_ALIAS};
use crate::query::{
    AggregateFunction, LogicalQuery, Predicate, Relation, ScalarExpr, SelectExpr, TableRef,
};
use crate::spec::{SourceTable, ValidationKind, ValidationSpec};
use crate::types::{apply_decimal_cap, comparison_type, Comparison, LogicalType};

/// Alias of the synthesized column-name column in schema validation.
pub const SCHEMA_COLUMN_NAME: &str = "column_name";

/// Alias of the synthesized type column in schema validation.
pub const SCHEMA_COLUMN_TYPE: &str = "column_type";

/// Alias of the skipped-row count column.
pub const SKIPPED_ROWS_ALIAS: &str = "skipped_rows";

/// What the coordinator runs on one side.
#[derive(Debug, Clone, PartialEq)]
pub enum SideTask {
    /// Execute a logical query.
    Query(LogicalQuery),
    /// Fetch and synthesize the table schema (schema validation).
    SchemaFetch(TableRef),
}

/// One side of the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct SidePlan {
    pub task: SideTask,
    /// Companion count of rows excluded for null primary keys.
    pub skipped_rows: Option<LogicalQuery>,
    /// Display name for result metadata.
    pub table_name: String,
}

/// Metadata for one compared value column.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueColumn {
    /// Lower-case alias in both result tables.
    pub alias: String,
    /// Aggregate label for the result's `aggregation_type`, when any.
    pub aggregation_type: Option<String>,
    pub source_column: Option<String>,
    pub target_column: Option<String>,
    pub comparison: Comparison,
    /// Whether the comparison decimal was truncated by a backend cap.
    pub truncated: bool,
}

/// The complete plan for one validation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationPlan {
    pub kind: ValidationKind,
    /// Lower-case join keys; empty means a single-group alignment.
    pub join_keys: Vec<String>,
    pub source: SidePlan,
    pub target: SidePlan,
    pub value_columns: Vec<ValueColumn>,
}

/// Plans a validation against two backends.
#[instrument(skip_all, fields(validation = %spec.name, kind = ?spec.kind))]
pub async fn plan(
    spec: &ValidationSpec,
    source: &dyn Backend,
    target: &dyn Backend,
) -> Result<ValidationPlan> {
    debug!("planning validation");
    match spec.kind {
        ValidationKind::Column => plan_column(spec, source, target).await,
        ValidationKind::Row => plan_row(spec, source, target).await,
        ValidationKind::Schema => plan_schema(spec),
        ValidationKind::CustomQuery => plan_custom_query(spec, source, target).await,
    }
}

fn side_relation(side: &SourceTable) -> Relation {
    match side {
        SourceTable::Table(table) => Relation::Table(table.clone()),
        SourceTable::Sql(sql) => Relation::Subquery(sql.clone()),
    }
}

async fn side_schema(backend: &dyn Backend, side: &SourceTable) -> Result<TableSchema> {
    match side {
        SourceTable::Table(table) => {
            backend
                .get_schema(&table.name, table.database.as_deref())
                .await
        }
        SourceTable::Sql(sql) => backend.query_schema(sql).await,
    }
}

/// Fails fast when a filter references a column absent from either side.
fn check_filters(
    spec: &ValidationSpec,
    source_schema: &TableSchema,
    target_schema: &TableSchema,
) -> Result<()> {
    for predicate in &spec.filters {
        for column in predicate.columns() {
            if !source_schema.contains(column) {
                return Err(ReckonError::FilterColumnMissing {
                    column: column.to_string(),
                    side: "source".to_string(),
                });
            }
            if !target_schema.contains(column) {
                return Err(ReckonError::FilterColumnMissing {
                    column: column.to_string(),
                    side: "target".to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Resolves a referenced column on one schema, collecting a violation when
/// absent.
fn resolve_column<'a>(
    schema: &'a TableSchema,
    column: &str,
    side: &str,
    violations: &mut Vec<String>,
) -> Option<&'a crate::backend::ColumnDef> {
    let def = schema.column(column);
    if def.is_none() {
        violations.push(format!("column '{column}' does not exist on the {side} side"));
    }
    def
}

/// Checks the group-by columns resolve and are mutually comparable, and
/// returns them lower-cased.
fn check_group_columns(
    spec: &ValidationSpec,
    source_schema: &TableSchema,
    target_schema: &TableSchema,
    violations: &mut Vec<String>,
) -> Result<Vec<String>> {
    let mut keys = Vec::with_capacity(spec.grouped_columns.len());
    for column in &spec.grouped_columns {
        let src = resolve_column(source_schema, column, "source", violations);
        let tgt = resolve_column(target_schema, column, "target", violations);
        if let (Some(src), Some(tgt)) = (src, tgt) {
            comparison_type(column, &src.ty, &tgt.ty)?;
        }
        keys.push(column.to_lowercase());
    }
    Ok(keys)
}

async fn plan_column(
    spec: &ValidationSpec,
    source: &dyn Backend,
    target: &dyn Backend,
) -> Result<ValidationPlan> {
    let source_schema = side_schema(source, &spec.source).await?;
    let target_schema = side_schema(target, &spec.target).await?;
    check_filters(spec, &source_schema, &target_schema)?;

    let mut violations = Vec::new();
    let join_keys = check_group_columns(spec, &source_schema, &target_schema, &mut violations)?;

    let mut source_projection = group_projection(&spec.grouped_columns);
    let mut target_projection = group_projection(&spec.grouped_columns);
    let mut value_columns = Vec::with_capacity(spec.aggregates.len());

    let cap = source
        .features()
        .decimal_precision_cap
        .min(target.features().decimal_precision_cap);

    for agg in &spec.aggregates {
        let alias = agg.field_alias.to_lowercase();

        if agg.function == AggregateFunction::BitXor {
            for backend in [source, target] {
                if !backend.features().supports_bit_xor {
                    return Err(ReckonError::Unsupported {
                        backend: backend.name().to_string(),
                        message: format!("bit_xor aggregate for '{alias}'"),
                    });
                }
            }
        }

        let (comparison, truncated, coerced) = match (&agg.source_column, agg.resolved_target_column())
        {
            (Some(src_col), Some(tgt_col)) => {
                let src = resolve_column(&source_schema, src_col, "source", &mut violations);
                let tgt = resolve_column(&target_schema, tgt_col, "target", &mut violations);
                match (src, tgt) {
                    (Some(src), Some(tgt)) => {
                        let pair = comparison_type(&alias, &src.ty, &tgt.ty)?;
                        let (capped, truncated) = apply_decimal_cap(&pair.target, cap);
                        (pair.comparison, truncated, Some(capped))
                    }
                    _ => (Comparison::Numeric, false, None),
                }
            }
            // count(*): always a plain numeric comparison.
            _ => (Comparison::Numeric, false, None),
        };

        // Counts are numeric whatever the counted column's type is.
        let comparison = match agg.function {
            AggregateFunction::Count | AggregateFunction::CountDistinct => Comparison::Numeric,
            _ => comparison,
        };

        source_projection.push(SelectExpr {
            expr: aggregate_expr(
                agg,
                agg.source_column.as_deref(),
                &coerced,
                &spec.source,
                &spec.filters,
                source,
            )?,
            alias: alias.clone(),
        });
        target_projection.push(SelectExpr {
            expr: aggregate_expr(
                agg,
                agg.resolved_target_column(),
                &coerced,
                &spec.target,
                &spec.filters,
                target,
            )?,
            alias: alias.clone(),
        });

        value_columns.push(ValueColumn {
            alias,
            aggregation_type: Some(agg.function.label().to_string()),
            source_column: agg.source_column.clone(),
            target_column: agg.resolved_target_column().map(str::to_string),
            comparison,
            truncated,
        });
    }

    if !violations.is_empty() {
        return Err(ReckonError::spec_invalid(violations));
    }

    let make_query = |side: &SourceTable, projection: Vec<SelectExpr>| LogicalQuery {
        relation: side_relation(side),
        projection,
        filters: spec.filters.clone(),
        group_by: spec.grouped_columns.clone(),
        order_by: spec.grouped_columns.iter().map(|c| c.to_lowercase()).collect(),
    };

    Ok(ValidationPlan {
        kind: spec.kind,
        join_keys,
        source: SidePlan {
            task: SideTask::Query(make_query(&spec.source, source_projection)),
            skipped_rows: None,
            table_name: spec.source.display_name(),
        },
        target: SidePlan {
            task: SideTask::Query(make_query(&spec.target, target_projection)),
            skipped_rows: None,
            table_name: spec.target.display_name(),
        },
        value_columns,
    })
}

fn group_projection(grouped_columns: &[String]) -> Vec<SelectExpr> {
    grouped_columns
        .iter()
        .map(|c| SelectExpr {
            expr: ScalarExpr::Column(c.clone()),
            alias: c.to_lowercase(),
        })
        .collect()
}

/// Compiles one aggregate through the rewrite table for one side.
fn aggregate_expr(
    agg: &crate::spec::AggregateSpec,
    column: Option<&str>,
    coerced: &Option<LogicalType>,
    side: &SourceTable,
    filters: &[Predicate],
    backend: &dyn Backend,
) -> Result<ScalarExpr> {
    let arg = column.map(|col| {
        let base = ScalarExpr::Column(col.to_string());
        let cast_ty = agg.cast.clone().or_else(|| {
            // sum/avg run on the coerced comparison type so wide tables
            // cannot overflow a narrow engine accumulator.
            match agg.function {
                AggregateFunction::Sum | AggregateFunction::Avg => coerced.clone(),
                _ => None,
            }
        });
        match cast_ty {
            Some(ty) => ScalarExpr::Cast {
                expr: Box::new(base),
                ty,
            },
            None => base,
        }
    });

    match agg.function {
        AggregateFunction::CountDistinct => {
            let col = column.ok_or_else(|| {
                ReckonError::Internal("count_distinct without a column".to_string())
            })?;
            if backend.features().supports_count_distinct {
                Ok(ScalarExpr::Aggregate {
                    function: AggregateFunction::Count,
                    arg: Some(Box::new(ScalarExpr::Column(col.to_string()))),
                    distinct: true,
                })
            } else {
                Ok(ScalarExpr::DistinctCountSubquery {
                    relation: side_relation(side),
                    column: col.to_string(),
                    filters: filters.to_vec(),
                })
            }
        }
        function => Ok(ScalarExpr::Aggregate {
            function,
            arg: arg.map(Box::new),
            distinct: false,
        }),
    }
}

async fn plan_row(
    spec: &ValidationSpec,
    source: &dyn Backend,
    target: &dyn Backend,
) -> Result<ValidationPlan> {
    for backend in [source, target] {
        if !backend.features().supports_sha256 {
            return Err(ReckonError::HashUnavailable {
                backend: backend.name().to_string(),
            });
        }
    }

    let source_schema = side_schema(source, &spec.source).await?;
    let target_schema = side_schema(target, &spec.target).await?;
    check_filters(spec, &source_schema, &target_schema)?;

    let mut violations = Vec::new();

    for key in &spec.primary_keys {
        let src = resolve_column(&source_schema, key, "source", &mut violations);
        let tgt = resolve_column(&target_schema, key, "target", &mut violations);
        // Nullability is a table-level fact; derived queries report their
        // output columns as nullable and rely on the null-PK exclusion
        // filters instead.
        if let (Some(def), SourceTable::Table(_)) = (src, &spec.source) {
            if def.nullable {
                violations.push(format!(
                    "primary key '{key}' is nullable on the source side"
                ));
            }
        }
        if let (Some(def), SourceTable::Table(_)) = (tgt, &spec.target) {
            if def.nullable {
                violations.push(format!(
                    "primary key '{key}' is nullable on the target side"
                ));
            }
        }
        if let (Some(src), Some(tgt)) = (src, tgt) {
            comparison_type(key, &src.ty, &tgt.ty)?;
        }
    }

    let mut source_ladders = Vec::with_capacity(spec.calculated_fields.len());
    let mut target_ladders = Vec::with_capacity(spec.calculated_fields.len());
    for field in &spec.calculated_fields {
        let src_col = field.resolved_source_column();
        let tgt_col = field.resolved_target_column();
        let src = resolve_column(&source_schema, src_col, "source", &mut violations);
        let tgt = resolve_column(&target_schema, tgt_col, "target", &mut violations);
        if let (Some(src), Some(tgt)) = (src, tgt) {
            let pair = comparison_type(&field.name, &src.ty, &tgt.ty)?;
            source_ladders.push(build_ladder(src_col, &pair.target, &spec.tolerances));
            target_ladders.push(build_ladder(tgt_col, &pair.target, &spec.tolerances));
        }
    }

    if !violations.is_empty() {
        return Err(ReckonError::spec_invalid(violations));
    }

    let join_keys: Vec<String> = spec.primary_keys.iter().map(|k| k.to_lowercase()).collect();

    let make_side = |side: &SourceTable, ladders: &[crate::pipeline::Ladder]| {
        let mut projection: Vec<SelectExpr> = spec
            .primary_keys
            .iter()
            .map(|k| SelectExpr {
                expr: ScalarExpr::Column(k.clone()),
                alias: k.to_lowercase(),
            })
            .collect();
        projection.push(SelectExpr {
            expr: fingerprint_expr(ladders),
            alias: HASH_ALIAS.to_string(),
        });

        // Rows with any null primary key are excluded from both sides and
        // counted into the skipped_rows scalar.
        let mut filters = spec.filters.clone();
        for key in &spec.primary_keys {
            filters.push(Predicate::IsNotNull(key.clone()));
        }

        let query = LogicalQuery {
            relation: side_relation(side),
            projection,
            filters,
            group_by: Vec::new(),
            order_by: join_keys.clone(),
        };

        let mut skipped_filters = spec.filters.clone();
        skipped_filters.push(Predicate::AnyNull(spec.primary_keys.clone()));
        let skipped = LogicalQuery {
            relation: side_relation(side),
            projection: vec![SelectExpr {
                expr: ScalarExpr::Aggregate {
                    function: AggregateFunction::Count,
                    arg: None,
                    distinct: false,
                },
                alias: SKIPPED_ROWS_ALIAS.to_string(),
            }],
            filters: skipped_filters,
            group_by: Vec::new(),
            order_by: Vec::new(),
        };

        SidePlan {
            task: SideTask::Query(query),
            skipped_rows: Some(skipped),
            table_name: side.display_name(),
        }
    };

    let source_side = make_side(&spec.source, &source_ladders);
    let target_side = make_side(&spec.target, &target_ladders);

    Ok(ValidationPlan {
        kind: spec.kind,
        join_keys,
        source: source_side,
        target: target_side,
        value_columns: vec![ValueColumn {
            alias: HASH_ALIAS.to_string(),
            aggregation_type: None,
            source_column: None,
            target_column: None,
            comparison: Comparison::Text,
            truncated: false,
        }],
    })
}

fn plan_schema(spec: &ValidationSpec) -> Result<ValidationPlan> {
    let side_table = |side: &SourceTable| -> Result<TableRef> {
        match side {
            SourceTable::Table(table) => Ok(table.clone()),
            SourceTable::Sql(_) => Err(ReckonError::spec_invalid(vec![
                "schema validation requires physical tables on both sides".to_string(),
            ])),
        }
    };
    let source_table = side_table(&spec.source)?;
    let target_table = side_table(&spec.target)?;

    Ok(ValidationPlan {
        kind: spec.kind,
        join_keys: vec![SCHEMA_COLUMN_NAME.to_string()],
        source: SidePlan {
            task: SideTask::SchemaFetch(source_table),
            skipped_rows: None,
            table_name: spec.source.display_name(),
        },
        target: SidePlan {
            task: SideTask::SchemaFetch(target_table),
            skipped_rows: None,
            table_name: spec.target.display_name(),
        },
        value_columns: vec![ValueColumn {
            alias: SCHEMA_COLUMN_TYPE.to_string(),
            aggregation_type: None,
            source_column: None,
            target_column: None,
            comparison: Comparison::Text,
            truncated: false,
        }],
    })
}

async fn plan_custom_query(
    spec: &ValidationSpec,
    source: &dyn Backend,
    target: &dyn Backend,
) -> Result<ValidationPlan> {
    if !spec.primary_keys.is_empty() {
        // Row semantics over the user queries: fingerprint every shared
        // output column (or the declared calculated fields).
        let source_schema = side_schema(source, &spec.source).await?;
        let target_schema = side_schema(target, &spec.target).await?;

        let mut derived = spec.clone();
        if derived.calculated_fields.is_empty() {
            derived.calculated_fields = source_schema
                .columns()
                .iter()
                .filter(|c| {
                    !spec
                        .primary_keys
                        .iter()
                        .any(|k| k.to_lowercase() == c.name)
                        && target_schema.contains(&c.name)
                })
                .map(|c| crate::spec::CalcField::new(c.name.clone()))
                .collect();
        }
        if derived.calculated_fields.is_empty() {
            return Err(ReckonError::spec_invalid(vec![
                "custom_query row validation found no shared non-key output columns".to_string(),
            ]));
        }
        derived.kind = ValidationKind::Row;
        let mut plan = Box::pin(plan_row(&derived, source, target)).await?;
        plan.kind = ValidationKind::CustomQuery;
        return Ok(plan);
    }

    if !spec.aggregates.is_empty() {
        // Aggregates over the wrapped user queries, one-row alignment.
        let mut plan = Box::pin(plan_column(spec, source, target)).await?;
        plan.kind = ValidationKind::CustomQuery;
        return Ok(plan);
    }

    Err(ReckonError::spec_invalid(vec![
        "custom_query validation needs either primary_keys (row semantics) or aggregates (column semantics)".to_string(),
    ]))
}
