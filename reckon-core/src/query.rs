//! Engine-agnostic logical queries.
//!
//! The planner emits [`LogicalQuery`] values; each backend renders them to
//! its own SQL through [`render_sql`], parameterised only by identifier
//! quoting and the backend's [`DialectFeatures`]. Parameters are carried as
//! explicit literal values substituted during rendering — there is no
//! callback-based parameter machinery.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::backend::DialectFeatures;
use crate::error::{ReckonError, Result};
use crate::types::{LogicalType, TypeMap};
use crate::value::Value;

/// Reserved separator for row-fingerprint concatenation, rendered as
/// `chr(31)` (ASCII unit separator). Canonical values never contain it.
pub const FINGERPRINT_SEPARATOR: u8 = 0x1f;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier regex is valid"));

/// Validates a SQL identifier before it is interpolated into rendered SQL.
///
/// Identifiers are restricted to the conservative portable subset; anything
/// else is rejected rather than escaped.
pub fn validate_identifier(identifier: &str, max_len: usize) -> Result<()> {
    if identifier.is_empty() || identifier.len() > max_len {
        return Err(ReckonError::Configuration(format!(
            "identifier '{identifier}' is empty or longer than {max_len} characters"
        )));
    }
    if !IDENTIFIER_RE.is_match(identifier) {
        return Err(ReckonError::Configuration(format!(
            "identifier '{identifier}' contains characters outside [A-Za-z0-9_$]"
        )));
    }
    Ok(())
}

/// A table reference, optionally qualified by database/schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub database: Option<String>,
    pub name: String,
}

impl TableRef {
    /// A bare table reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            database: None,
            name: name.into(),
        }
    }

    /// A database-qualified table reference.
    pub fn qualified(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            name: name.into(),
        }
    }

    /// Display form without quoting, for logs and result metadata.
    pub fn display_name(&self) -> String {
        match &self.database {
            Some(db) => format!("{db}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// The relation a query reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    /// A physical table.
    Table(TableRef),
    /// User-supplied SQL wrapped as a derived table.
    Subquery(String),
}

/// Comparison operators usable in filter predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A filter predicate applied uniformly to both sides of a validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    /// True when any of the listed columns is null. Planner-internal, used
    /// to count rows excluded for null primary keys.
    AnyNull(Vec<String>),
}

impl Predicate {
    /// The columns this predicate references.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::Compare { column, .. } => vec![column],
            Self::IsNull(column) | Self::IsNotNull(column) => vec![column],
            Self::AnyNull(columns) => columns.iter().map(String::as_str).collect(),
        }
    }
}

/// Scalar and aggregate expressions the planner can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarExpr {
    /// A bare column reference.
    Column(String),
    /// A literal value substituted at render time.
    Literal(Value),
    /// `CAST(expr AS type)`.
    Cast {
        expr: Box<ScalarExpr>,
        ty: LogicalType,
    },
    /// `COALESCE(expr, …)`.
    Coalesce(Vec<ScalarExpr>),
    /// Trailing-whitespace trim.
    Rtrim(Box<ScalarExpr>),
    /// Upper-casing for case-insensitive comparison.
    Upper(Box<ScalarExpr>),
    /// Ordered concatenation joined with the reserved separator.
    Concat(Vec<ScalarExpr>),
    /// SHA-256 digest rendered as a lower-case hex string.
    Sha256Hex(Box<ScalarExpr>),
    /// An aggregate call.
    Aggregate {
        function: AggregateFunction,
        /// `None` means `count(*)`, rewritten to `count(1)` at render time.
        arg: Option<Box<ScalarExpr>>,
        distinct: bool,
    },
    /// Fallback for `count(distinct x)` on backends without native support:
    /// `(SELECT COUNT(*) FROM (SELECT DISTINCT x FROM rel WHERE x IS NOT NULL))`.
    DistinctCountSubquery {
        relation: Relation,
        column: String,
        filters: Vec<Predicate>,
    },
}

/// Aggregate functions supported by column validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
    BitXor,
}

impl AggregateFunction {
    /// SQL name of the aggregate.
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Count | Self::CountDistinct => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::BitXor => "BIT_XOR",
        }
    }

    /// Lower-case label carried into the result's `aggregation_type` column.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountDistinct => "count_distinct",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::BitXor => "bit_xor",
        }
    }
}

/// One projected expression with its output label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectExpr {
    pub expr: ScalarExpr,
    pub alias: String,
}

/// An engine-agnostic query: projection over a relation with filters,
/// grouping and a deterministic ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalQuery {
    pub relation: Relation,
    pub projection: Vec<SelectExpr>,
    pub filters: Vec<Predicate>,
    /// Group-by column names (already projected).
    pub group_by: Vec<String>,
    /// Aliases to order the result by, ascending.
    pub order_by: Vec<String>,
}

impl LogicalQuery {
    /// A projection-only query over a relation.
    pub fn new(relation: Relation, projection: Vec<SelectExpr>) -> Self {
        Self {
            relation,
            projection,
            filters: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
        }
    }
}

/// Identifier quoting style for a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// `"identifier"` (ANSI, DataFusion, Postgres).
    Double,
    /// `` `identifier` `` (BigQuery, MySQL).
    Backtick,
}

impl QuoteStyle {
    /// Quotes a single identifier segment.
    pub fn quote(&self, identifier: &str) -> String {
        match self {
            Self::Double => format!("\"{identifier}\""),
            Self::Backtick => format!("`{identifier}`"),
        }
    }
}

/// Rendering context: everything dialect-specific the renderer needs.
pub struct SqlDialect<'a> {
    pub quote: QuoteStyle,
    pub types: &'a TypeMap,
    pub features: &'a DialectFeatures,
}

impl<'a> SqlDialect<'a> {
    fn quote_ident(&self, identifier: &str) -> Result<String> {
        validate_identifier(identifier, self.features.max_identifier_length)?;
        Ok(self.quote.quote(identifier))
    }

    fn quote_table(&self, table: &TableRef) -> Result<String> {
        match &table.database {
            Some(db) => Ok(format!(
                "{}.{}",
                self.quote_ident(db)?,
                self.quote_ident(&table.name)?
            )),
            None => self.quote_ident(&table.name),
        }
    }
}

/// Renders a logical query to SQL for one dialect.
pub fn render_sql(query: &LogicalQuery, dialect: &SqlDialect<'_>) -> Result<String> {
    let mut sql = String::from("SELECT ");
    for (i, select) in query.projection.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        let rendered = render_expr(&select.expr, dialect)?;
        let alias = dialect.quote_ident(&select.alias)?;
        let _ = write!(sql, "{rendered} AS {alias}");
    }

    let _ = write!(sql, " FROM {}", render_relation(&query.relation, dialect)?);

    if !query.filters.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&render_filters(&query.filters, dialect)?);
    }

    if !query.group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        for (i, col) in query.group_by.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&dialect.quote_ident(col)?);
        }
    }

    if !query.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        for (i, alias) in query.order_by.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&dialect.quote_ident(alias)?);
        }
    }

    Ok(sql)
}

fn render_relation(relation: &Relation, dialect: &SqlDialect<'_>) -> Result<String> {
    match relation {
        Relation::Table(table) => dialect.quote_table(table),
        Relation::Subquery(sql) => Ok(format!("({sql}) AS user_query")),
    }
}

fn render_filters(filters: &[Predicate], dialect: &SqlDialect<'_>) -> Result<String> {
    let rendered: Result<Vec<String>> = filters
        .iter()
        .map(|p| render_predicate(p, dialect))
        .collect();
    Ok(rendered?.join(" AND "))
}

fn render_predicate(predicate: &Predicate, dialect: &SqlDialect<'_>) -> Result<String> {
    match predicate {
        Predicate::Compare { column, op, value } => Ok(format!(
            "{} {} {}",
            dialect.quote_ident(column)?,
            op.sql(),
            render_literal(value)
        )),
        Predicate::IsNull(column) => Ok(format!("{} IS NULL", dialect.quote_ident(column)?)),
        Predicate::IsNotNull(column) => {
            Ok(format!("{} IS NOT NULL", dialect.quote_ident(column)?))
        }
        Predicate::AnyNull(columns) => {
            let parts: Result<Vec<String>> = columns
                .iter()
                .map(|c| Ok(format!("{} IS NULL", dialect.quote_ident(c)?)))
                .collect();
            Ok(format!("({})", parts?.join(" OR ")))
        }
    }
}

fn render_expr(expr: &ScalarExpr, dialect: &SqlDialect<'_>) -> Result<String> {
    match expr {
        ScalarExpr::Column(name) => dialect.quote_ident(name),
        ScalarExpr::Literal(value) => Ok(render_literal(value)),
        ScalarExpr::Cast { expr, ty } => Ok(format!(
            "CAST({} AS {})",
            render_expr(expr, dialect)?,
            dialect.types.sql_name(ty)
        )),
        ScalarExpr::Coalesce(exprs) => {
            let parts: Result<Vec<String>> =
                exprs.iter().map(|e| render_expr(e, dialect)).collect();
            Ok(format!("COALESCE({})", parts?.join(", ")))
        }
        ScalarExpr::Rtrim(inner) => Ok(format!("RTRIM({})", render_expr(inner, dialect)?)),
        ScalarExpr::Upper(inner) => Ok(format!("UPPER({})", render_expr(inner, dialect)?)),
        ScalarExpr::Concat(parts) => {
            let mut rendered = Vec::with_capacity(parts.len() * 2);
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    rendered.push(format!("CHR({FINGERPRINT_SEPARATOR})"));
                }
                rendered.push(render_expr(part, dialect)?);
            }
            Ok(format!("CONCAT({})", rendered.join(", ")))
        }
        ScalarExpr::Sha256Hex(inner) => {
            if !dialect.features.supports_sha256 {
                return Err(ReckonError::Internal(
                    "sha256 rendered against a backend without support".to_string(),
                ));
            }
            Ok(format!(
                "ENCODE(SHA256({}), 'hex')",
                render_expr(inner, dialect)?
            ))
        }
        ScalarExpr::Aggregate {
            function,
            arg,
            distinct,
        } => {
            let inner = match arg {
                // count(*) is always rewritten to count(1).
                None => "1".to_string(),
                Some(expr) => render_expr(expr, dialect)?,
            };
            let distinct_kw = if *distinct { "DISTINCT " } else { "" };
            Ok(format!("{}({distinct_kw}{inner})", function.sql_name()))
        }
        ScalarExpr::DistinctCountSubquery {
            relation,
            column,
            filters,
        } => {
            let col = dialect.quote_ident(column)?;
            let mut predicates = filters.clone();
            predicates.push(Predicate::IsNotNull(column.clone()));
            let where_clause = render_filters(&predicates, dialect)?;
            Ok(format!(
                "(SELECT COUNT(1) FROM (SELECT DISTINCT {col} FROM {} WHERE {where_clause}) AS distinct_vals)",
                render_relation(relation, dialect)?
            ))
        }
    }
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(_) | Value::Float(_) | Value::Decimal { .. } => value.render(),
        Value::Str(v) => format!("'{}'", v.replace('\'', "''")),
        Value::Bytes(v) => format!("X'{}'", value_hex(v)),
        Value::Date(_) => format!("DATE '{}'", value.render()),
        Value::Timestamp(_) => format!("TIMESTAMP '{}'", value.render()),
    }
}

fn value_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, b| {
        let _ = write!(acc, "{b:02X}");
        acc
    })
}
