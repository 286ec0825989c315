//! Calculated-field pipeline.
//!
//! Row validation canonicalises every compared column through a fixed ladder
//! of derived columns, each named by prepending the op to the prior name:
//!
//! ```text
//! cast__X → ifnull__cast__X → rstrip__ifnull__cast__X → upper__rstrip__ifnull__cast__X
//! ```
//!
//! then concatenates the level-4 columns of every field in declaration order
//! (reserved separator, see [`crate::query::FINGERPRINT_SEPARATOR`]) and
//! hashes the concatenation with SHA-256. The ladder is produced identically
//! on source and target; the derived names are a contract and are asserted
//! exactly by tests.

use chrono::NaiveDate;

use crate::query::ScalarExpr;
use crate::spec::Tolerances;
use crate::types::LogicalType;
use crate::value::Value;

/// Alias of the projected concatenation column.
pub const CONCAT_ALIAS: &str = "concat__all";

/// Alias of the projected fingerprint column.
pub const HASH_ALIAS: &str = "hash__all";

/// The ops of the ladder, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcOp {
    Cast,
    IfNull,
    Rstrip,
    Upper,
    Concat,
    Hash,
}

impl CalcOp {
    /// Name prefix this op contributes.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Cast => "cast",
            Self::IfNull => "ifnull",
            Self::Rstrip => "rstrip",
            Self::Upper => "upper",
            Self::Concat => "concat",
            Self::Hash => "hash",
        }
    }

    /// Derives the name of this op's output from its input name.
    pub fn derived_name(&self, inner: &str) -> String {
        format!("{}__{inner}", self.prefix())
    }
}

/// One level of a column's ladder: the derived name and the full expression
/// that computes it from the base column.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedColumn {
    pub name: String,
    pub expr: ScalarExpr,
}

/// The complete ladder for one calculated field.
#[derive(Debug, Clone, PartialEq)]
pub struct Ladder {
    /// The base column the ladder canonicalises.
    pub column: String,
    /// Levels 1–4 in order (cast, ifnull, rstrip, upper).
    pub levels: Vec<DerivedColumn>,
}

impl Ladder {
    /// The level-4 derived column feeding the fingerprint.
    pub fn canonical(&self) -> &DerivedColumn {
        self.levels.last().expect("ladder always has four levels")
    }
}

/// Typed sentinel substituted for nulls at the `ifnull` level: `0` for
/// numerics, the empty string for strings, the epoch for dates.
fn null_sentinel(ty: &LogicalType) -> Value {
    if ty.is_numeric() {
        Value::Decimal {
            unscaled: 0,
            scale: 0,
        }
    } else if ty.is_temporal() {
        Value::Date(NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date is valid"))
    } else {
        Value::Str(String::new())
    }
}

/// Builds the four-level ladder for one column.
///
/// `rstrip` and `upper` are identity for non-strings (and `upper` is identity
/// unless the tolerances ask for case-insensitive comparison), but the level
/// names are always produced so the contract holds for every column.
pub fn build_ladder(column: &str, comparison_ty: &LogicalType, tolerances: &Tolerances) -> Ladder {
    let base = ScalarExpr::Column(column.to_string());

    let cast_name = CalcOp::Cast.derived_name(column);
    let cast_expr = ScalarExpr::Cast {
        expr: Box::new(base),
        ty: comparison_ty.clone(),
    };

    let ifnull_name = CalcOp::IfNull.derived_name(&cast_name);
    let ifnull_expr = ScalarExpr::Coalesce(vec![
        cast_expr.clone(),
        ScalarExpr::Cast {
            expr: Box::new(ScalarExpr::Literal(null_sentinel(comparison_ty))),
            ty: comparison_ty.clone(),
        },
    ]);

    let rstrip_name = CalcOp::Rstrip.derived_name(&ifnull_name);
    let rstrip_expr = if comparison_ty == &LogicalType::String && tolerances.trim_strings {
        ScalarExpr::Rtrim(Box::new(ifnull_expr.clone()))
    } else {
        ifnull_expr.clone()
    };

    let upper_name = CalcOp::Upper.derived_name(&rstrip_name);
    let upper_expr = if comparison_ty == &LogicalType::String && tolerances.case_insensitive {
        ScalarExpr::Upper(Box::new(rstrip_expr.clone()))
    } else {
        rstrip_expr.clone()
    };

    Ladder {
        column: column.to_string(),
        levels: vec![
            DerivedColumn {
                name: cast_name,
                expr: cast_expr,
            },
            DerivedColumn {
                name: ifnull_name,
                expr: ifnull_expr,
            },
            DerivedColumn {
                name: rstrip_name,
                expr: rstrip_expr,
            },
            DerivedColumn {
                name: upper_name,
                expr: upper_expr,
            },
        ],
    }
}

/// Builds the row-fingerprint expression over the canonical level of every
/// ladder, in declaration order.
pub fn fingerprint_expr(ladders: &[Ladder]) -> ScalarExpr {
    let parts = ladders
        .iter()
        .map(|ladder| {
            // Hash input is always text; canonical numerics/dates are cast
            // through string so both sides render identically.
            ScalarExpr::Cast {
                expr: Box::new(ladder.canonical().expr.clone()),
                ty: LogicalType::String,
            }
        })
        .collect();
    ScalarExpr::Sha256Hex(Box::new(ScalarExpr::Concat(parts)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tolerances() -> Tolerances {
        Tolerances::default()
    }

    #[test]
    fn test_ladder_names_are_exact() {
        let ladder = build_ladder("col_a", &LogicalType::String, &tolerances());
        let names: Vec<&str> = ladder.levels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "cast__col_a",
                "ifnull__cast__col_a",
                "rstrip__ifnull__cast__col_a",
                "upper__rstrip__ifnull__cast__col_a",
            ]
        );
    }

    #[test]
    fn test_names_identical_for_non_strings() {
        // Ops degrade to identity for non-strings, names never do.
        let ladder = build_ladder("amount", &LogicalType::compare_decimal(), &tolerances());
        assert_eq!(
            ladder.canonical().name,
            "upper__rstrip__ifnull__cast__amount"
        );
        // rstrip level is the same expression as ifnull level for numerics.
        assert_eq!(ladder.levels[2].expr, ladder.levels[1].expr);
    }

    #[test]
    fn test_upper_applied_only_when_case_insensitive() {
        let mut tol = tolerances();
        let exact = build_ladder("name", &LogicalType::String, &tol);
        assert_eq!(exact.levels[3].expr, exact.levels[2].expr);

        tol.case_insensitive = true;
        let folded = build_ladder("name", &LogicalType::String, &tol);
        assert!(matches!(folded.levels[3].expr, ScalarExpr::Upper(_)));
    }

    #[test]
    fn test_numeric_sentinel_is_zero_and_string_sentinel_empty() {
        assert_eq!(
            null_sentinel(&LogicalType::Int64),
            Value::Decimal {
                unscaled: 0,
                scale: 0
            }
        );
        assert_eq!(null_sentinel(&LogicalType::String), Value::Str(String::new()));
        assert!(matches!(null_sentinel(&LogicalType::Date), Value::Date(_)));
    }

    #[test]
    fn test_fingerprint_hashes_concat_of_all_fields() {
        let ladders = vec![
            build_ladder("a", &LogicalType::String, &tolerances()),
            build_ladder("b", &LogicalType::String, &tolerances()),
        ];
        let expr = fingerprint_expr(&ladders);
        match expr {
            ScalarExpr::Sha256Hex(inner) => match *inner {
                ScalarExpr::Concat(parts) => assert_eq!(parts.len(), 2),
                other => panic!("expected concat under hash, got {other:?}"),
            },
            other => panic!("expected sha256, got {other:?}"),
        }
    }
}
