//! Property-based checks for the classifier invariants.

use proptest::prelude::*;
use reckon_core::comparator::{align_and_classify, numeric_within_tolerance};
use reckon_core::planner::{SidePlan, SideTask, ValidationPlan, ValueColumn};
use reckon_core::query::TableRef;
use reckon_core::result::ValidationStatus;
use reckon_core::spec::{Tolerances, ValidationKind};
use reckon_core::table::Table;
use reckon_core::types::Comparison;
use reckon_core::value::Value;

fn numeric_plan() -> ValidationPlan {
    ValidationPlan {
        kind: ValidationKind::Column,
        join_keys: vec!["id".to_string()],
        source: SidePlan {
            task: SideTask::SchemaFetch(TableRef::new("unused")),
            skipped_rows: None,
            table_name: "src".to_string(),
        },
        target: SidePlan {
            task: SideTask::SchemaFetch(TableRef::new("unused")),
            skipped_rows: None,
            table_name: "tgt".to_string(),
        },
        value_columns: vec![ValueColumn {
            alias: "metric".to_string(),
            aggregation_type: Some("sum".to_string()),
            source_column: None,
            target_column: None,
            comparison: Comparison::Numeric,
            truncated: false,
        }],
    }
}

fn keyed_table(rows: &[(i64, f64)]) -> Table {
    Table::new(
        vec!["id".to_string(), "metric".to_string()],
        rows.iter()
            .map(|(k, v)| vec![Value::Int(*k), Value::Float(*v)])
            .collect(),
    )
}

proptest! {
    /// A pair classifying success at tolerance `t` stays success at any
    /// larger tolerance.
    #[test]
    fn tolerance_is_monotonic(
        sv in -1.0e9f64..1.0e9,
        tv in -1.0e9f64..1.0e9,
        abs in 0.0f64..1.0e6,
        extra in 0.0f64..1.0e6,
    ) {
        let tight = Tolerances { abs_tol: abs, ..Tolerances::default() };
        let loose = Tolerances { abs_tol: abs + extra, ..Tolerances::default() };
        if numeric_within_tolerance(sv, tv, &tight) {
            prop_assert!(numeric_within_tolerance(sv, tv, &loose));
        }
    }

    /// Relative tolerance is symmetric in its magnitude argument.
    #[test]
    fn relative_tolerance_is_symmetric(
        sv in -1.0e9f64..1.0e9,
        tv in -1.0e9f64..1.0e9,
        rel in 0.0f64..1.0,
    ) {
        let tolerances = Tolerances { rel_tol: rel, ..Tolerances::default() };
        prop_assert_eq!(
            numeric_within_tolerance(sv, tv, &tolerances),
            numeric_within_tolerance(tv, sv, &tolerances)
        );
    }

    /// Swapping source and target flips source_only/target_only, keeps
    /// success/fail, and negates the difference.
    #[test]
    fn swap_symmetry(
        left in proptest::collection::btree_map(0i64..40, -1.0e6f64..1.0e6, 0..12),
        right in proptest::collection::btree_map(0i64..40, -1.0e6f64..1.0e6, 0..12),
    ) {
        let left_rows: Vec<(i64, f64)> = left.into_iter().collect();
        let right_rows: Vec<(i64, f64)> = right.into_iter().collect();
        let plan = numeric_plan();
        let tolerances = Tolerances::default();

        let forward = align_and_classify(
            &plan,
            &tolerances,
            keyed_table(&left_rows),
            keyed_table(&right_rows),
            10_000,
        ).unwrap();
        let backward = align_and_classify(
            &plan,
            &tolerances,
            keyed_table(&right_rows),
            keyed_table(&left_rows),
            10_000,
        ).unwrap();

        prop_assert_eq!(forward.len(), backward.len());
        for (f, b) in forward.iter().zip(&backward) {
            prop_assert_eq!(&f.group_key, &b.group_key);
            prop_assert_eq!(f.status, match b.status {
                ValidationStatus::SourceOnly => ValidationStatus::TargetOnly,
                ValidationStatus::TargetOnly => ValidationStatus::SourceOnly,
                other => other,
            });
            match (f.difference, b.difference) {
                (Some(fd), Some(bd)) => prop_assert!((fd + bd).abs() < 1e-9_f64.max(fd.abs() * 1e-12)),
                (None, None) => {}
                other => prop_assert!(false, "difference asymmetry: {other:?}"),
            }
        }
    }

    /// The aligner never emits more than one row per key in row mode.
    #[test]
    fn at_most_one_row_per_key(
        keys in proptest::collection::vec(0i64..10, 0..40),
    ) {
        let rows: Vec<(i64, f64)> = keys.iter().map(|k| (*k, *k as f64)).collect();
        let plan = numeric_plan();
        let aligned = align_and_classify(
            &plan,
            &Tolerances::default(),
            keyed_table(&rows),
            keyed_table(&rows),
            10_000,
        ).unwrap();

        let mut seen = std::collections::BTreeSet::new();
        for row in &aligned {
            prop_assert!(seen.insert(row.group_key.clone()), "duplicate key in result");
        }
    }
}
