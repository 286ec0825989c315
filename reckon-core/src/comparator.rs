//! Aligner and classifier.
//!
//! Takes the two labeled result tables of a run, full-outer merge-joins them
//! on the plan's join keys and classifies every aligned value pair within the
//! spec's tolerances. Alignment is streaming: rows are key-sorted and only
//! the current join group is held in memory, so inputs larger than the
//! configured row budget spill to a temporary key-sorted file and are merged
//! back from disk.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use tracing::{debug, warn};

use crate::error::{ReckonError, Result};
use crate::planner::ValidationPlan;
use crate::result::ValidationStatus;
use crate::spec::Tolerances;
use crate::table::Table;
use crate::types::Comparison;
use crate::value::{compare_keys, Value};

/// One classified comparison, keyed by the join-key values.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedRow {
    /// Join key values in key order, paired with their lower-case names.
    pub group_key: Vec<(String, Value)>,
    /// The compared value column's alias.
    pub alias: String,
    pub source_value: Option<Value>,
    pub target_value: Option<Value>,
    pub status: ValidationStatus,
    pub difference: Option<f64>,
    pub pct_difference: Option<f64>,
}

/// Classifies a numeric pair against the tolerances.
///
/// A pair matches when `|sv − tv| ≤ max(abs_tol, rel_tol · max(|sv|, |tv|))`.
pub fn numeric_within_tolerance(sv: f64, tv: f64, tolerances: &Tolerances) -> bool {
    let slack = tolerances
        .abs_tol
        .max(tolerances.rel_tol * sv.abs().max(tv.abs()));
    (tv - sv).abs() <= slack
}

/// Aligns two key-sorted result tables and classifies every value pair.
///
/// Output ordering is deterministic: join keys ascending, then value-column
/// alias ascending.
pub fn align_and_classify(
    plan: &ValidationPlan,
    tolerances: &Tolerances,
    source: Table,
    target: Table,
    row_budget: usize,
) -> Result<Vec<AlignedRow>> {
    let key_names = &plan.join_keys;
    let source_keys = source.column_indices(key_names)?;
    let target_keys = target.column_indices(key_names)?;

    // Emission order within a key group: aliases ascending.
    let mut ordered_columns: Vec<&crate::planner::ValueColumn> =
        plan.value_columns.iter().collect();
    ordered_columns.sort_by(|a, b| a.alias.cmp(&b.alias));

    let source_values: Vec<(usize, &crate::planner::ValueColumn)> = ordered_columns
        .iter()
        .map(|vc| Ok((source.column_indices(&[vc.alias.clone()])?[0], *vc)))
        .collect::<Result<_>>()?;
    let target_values: Vec<usize> = ordered_columns
        .iter()
        .map(|vc| Ok(target.column_indices(&[vc.alias.clone()])?[0]))
        .collect::<Result<_>>()?;

    let mut left = RowStream::new(source, &source_keys, row_budget)?;
    let mut right = RowStream::new(target, &target_keys, row_budget)?;

    let mut out = Vec::new();
    loop {
        let ord = match (left.peek(), right.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(l), Some(r)) => cross_key_cmp(l, &source_keys, r, &target_keys),
        };

        match ord {
            Ordering::Less => {
                let row = left.take_group(&source_keys)?;
                emit_one_sided(
                    &mut out,
                    &row,
                    &source_keys,
                    key_names,
                    &source_values,
                    ValidationStatus::SourceOnly,
                );
            }
            Ordering::Greater => {
                let row = right.take_group(&target_keys)?;
                let values: Vec<(usize, &crate::planner::ValueColumn)> = target_values
                    .iter()
                    .zip(ordered_columns.iter())
                    .map(|(idx, vc)| (*idx, *vc))
                    .collect();
                emit_one_sided(
                    &mut out,
                    &row,
                    &target_keys,
                    key_names,
                    &values,
                    ValidationStatus::TargetOnly,
                );
            }
            Ordering::Equal => {
                let l = left.take_group(&source_keys)?;
                let r = right.take_group(&target_keys)?;
                let group_key = key_values(&l, &source_keys, key_names);
                for ((src_idx, vc), tgt_idx) in source_values.iter().zip(&target_values) {
                    let sv = l[*src_idx].clone();
                    let tv = r[*tgt_idx].clone();
                    out.push(classify_pair(
                        group_key.clone(),
                        vc,
                        sv,
                        tv,
                        tolerances,
                    ));
                }
            }
        }
    }

    Ok(out)
}

fn cross_key_cmp(
    left: &[Value],
    left_keys: &[usize],
    right: &[Value],
    right_keys: &[usize],
) -> Ordering {
    for (&li, &ri) in left_keys.iter().zip(right_keys) {
        let ord = left[li].key_cmp(&right[ri]);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn key_values(row: &[Value], key_idx: &[usize], key_names: &[String]) -> Vec<(String, Value)> {
    key_names
        .iter()
        .zip(key_idx)
        .map(|(name, &i)| (name.clone(), row[i].clone()))
        .collect()
}

fn emit_one_sided(
    out: &mut Vec<AlignedRow>,
    row: &[Value],
    key_idx: &[usize],
    key_names: &[String],
    values: &[(usize, &crate::planner::ValueColumn)],
    status: ValidationStatus,
) {
    let group_key = key_values(row, key_idx, key_names);
    for (idx, vc) in values {
        let value = row[*idx].clone();
        let (source_value, target_value) = match status {
            ValidationStatus::SourceOnly => (Some(value), None),
            _ => (None, Some(value)),
        };
        out.push(AlignedRow {
            group_key: group_key.clone(),
            alias: vc.alias.clone(),
            source_value,
            target_value,
            status,
            difference: None,
            pct_difference: None,
        });
    }
}

fn classify_pair(
    group_key: Vec<(String, Value)>,
    vc: &crate::planner::ValueColumn,
    sv: Value,
    tv: Value,
    tolerances: &Tolerances,
) -> AlignedRow {
    let mut row = AlignedRow {
        group_key,
        alias: vc.alias.clone(),
        source_value: Some(sv.clone()),
        target_value: Some(tv.clone()),
        status: ValidationStatus::Fail,
        difference: None,
        pct_difference: None,
    };

    // Null semantics are shared by every comparison kind.
    match (sv.is_null(), tv.is_null()) {
        (true, true) => {
            row.status = if tolerances.null_equals_null {
                ValidationStatus::Success
            } else {
                ValidationStatus::Fail
            };
            return row;
        }
        (true, false) | (false, true) => {
            row.status = ValidationStatus::Fail;
            return row;
        }
        (false, false) => {}
    }

    match vc.comparison {
        Comparison::Numeric => {
            let (Some(sf), Some(tf)) = (sv.as_f64(), tv.as_f64()) else {
                row.status = ValidationStatus::Fail;
                return row;
            };
            row.difference = Some(tf - sf);
            row.pct_difference = if sf != 0.0 {
                Some((tf - sf) / sf)
            } else {
                None
            };
            row.status = if numeric_within_tolerance(sf, tf, tolerances) {
                ValidationStatus::Success
            } else {
                ValidationStatus::Fail
            };
        }
        Comparison::Text => {
            let equal = match (&sv, &tv) {
                (Value::Str(a), Value::Str(b)) => a == b,
                (Value::Bytes(a), Value::Bytes(b)) => a == b,
                _ => sv.render() == tv.render(),
            };
            row.status = if equal {
                ValidationStatus::Success
            } else {
                ValidationStatus::Fail
            };
        }
        Comparison::Temporal => {
            let normalize = |v: &Value| match v {
                // A date on either side truncates the other side's timestamp.
                Value::Timestamp(ts) => ts.date_naive(),
                Value::Date(d) => *d,
                _ => chrono::NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date is valid"),
            };
            let equal = match (&sv, &tv) {
                (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
                _ => normalize(&sv) == normalize(&tv),
            };
            row.status = if equal {
                ValidationStatus::Success
            } else {
                ValidationStatus::Fail
            };
        }
    }
    row
}

/// A stream of key-sorted rows, either in memory or spilled to disk.
struct RowStream {
    next: Option<Vec<Value>>,
    inner: RowSource,
}

enum RowSource {
    Mem(std::vec::IntoIter<Vec<Value>>),
    Spilled(std::io::Lines<BufReader<File>>),
}

impl RowStream {
    /// Sorts the table by its key columns and wraps it for streaming.
    ///
    /// Tables above the row budget are written to a temporary key-sorted
    /// JSON-lines file and dropped from memory; the merge then reads them
    /// back one row at a time.
    fn new(mut table: Table, key_idx: &[usize], row_budget: usize) -> Result<Self> {
        table.sort_by_keys(key_idx);
        let inner = if table.len() > row_budget {
            warn!(
                rows = table.len(),
                budget = row_budget,
                "row budget exceeded, spilling sorted rows to disk"
            );
            RowSource::Spilled(spill(table)?)
        } else {
            RowSource::Mem(table.into_rows().into_iter())
        };
        let mut stream = Self { next: None, inner };
        stream.advance()?;
        Ok(stream)
    }

    fn peek(&self) -> Option<&Vec<Value>> {
        self.next.as_ref()
    }

    fn advance(&mut self) -> Result<()> {
        self.next = match &mut self.inner {
            RowSource::Mem(iter) => iter.next(),
            RowSource::Spilled(lines) => match lines.next() {
                None => None,
                Some(line) => {
                    let line = line?;
                    Some(serde_json::from_str(&line).map_err(|e| {
                        ReckonError::Serialization(format!("corrupt spill row: {e}"))
                    })?)
                }
            },
        };
        Ok(())
    }

    /// Takes the first row of the current key group and consumes the rest of
    /// the group, so the result carries at most one row per key tuple.
    fn take_group(&mut self, key_idx: &[usize]) -> Result<Vec<Value>> {
        let head = self
            .next
            .take()
            .ok_or_else(|| ReckonError::Internal("take_group on empty stream".to_string()))?;
        self.advance()?;
        while let Some(candidate) = self.peek() {
            if compare_keys(&head, candidate, key_idx) != Ordering::Equal {
                break;
            }
            self.advance()?;
        }
        Ok(head)
    }
}

fn spill(table: Table) -> Result<std::io::Lines<BufReader<File>>> {
    let file = tempfile::tempfile()?;
    let mut writer = BufWriter::new(file);
    let row_count = table.len();
    for row in table.into_rows() {
        let line = serde_json::to_string(&row)
            .map_err(|e| ReckonError::Serialization(format!("spill row: {e}")))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    let mut file = writer
        .into_inner()
        .map_err(|e| ReckonError::Io(e.into_error()))?;
    file.seek(SeekFrom::Start(0))?;
    debug!(rows = row_count, "spill file written");
    Ok(BufReader::new(file).lines())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{SidePlan, SideTask, ValidationPlan, ValueColumn};
    use crate::query::TableRef;
    use crate::spec::ValidationKind;

    fn plan_with(join_keys: Vec<&str>, columns: Vec<(&str, Comparison)>) -> ValidationPlan {
        ValidationPlan {
            kind: ValidationKind::Column,
            join_keys: join_keys.into_iter().map(String::from).collect(),
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
            value_columns: columns
                .into_iter()
                .map(|(alias, comparison)| ValueColumn {
                    alias: alias.to_string(),
                    aggregation_type: None,
                    source_column: None,
                    target_column: None,
                    comparison,
                    truncated: false,
                })
                .collect(),
        }
    }

    fn table(columns: Vec<&str>, rows: Vec<Vec<Value>>) -> Table {
        Table::new(columns.into_iter().map(String::from).collect(), rows)
    }

    #[test]
    fn test_single_group_numeric_match() {
        let plan = plan_with(vec![], vec![("row_count", Comparison::Numeric)]);
        let source = table(vec!["row_count"], vec![vec![Value::Int(1000)]]);
        let target = table(vec!["row_count"], vec![vec![Value::Int(1000)]]);

        let rows =
            align_and_classify(&plan, &Tolerances::default(), source, target, 10_000).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ValidationStatus::Success);
        assert_eq!(rows[0].difference, Some(0.0));
        assert_eq!(rows[0].pct_difference, Some(0.0));
    }

    #[test]
    fn test_absolute_tolerance_admits_small_drift() {
        let plan = plan_with(vec![], vec![("sum_amount", Comparison::Numeric)]);
        let source = table(vec!["sum_amount"], vec![vec![Value::Float(12345.67)]]);
        let target = table(vec!["sum_amount"], vec![vec![Value::Float(12345.66)]]);

        let tolerances = Tolerances {
            abs_tol: 0.01,
            ..Tolerances::default()
        };
        let rows = align_and_classify(&plan, &tolerances, source, target, 10_000).unwrap();
        assert_eq!(rows[0].status, ValidationStatus::Success);
        let diff = rows[0].difference.unwrap();
        assert!((diff + 0.01).abs() < 1e-6);
        assert!(rows[0].pct_difference.unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_source_only_and_target_only_keys() {
        let plan = plan_with(vec!["id"], vec![("hash__all", Comparison::Text)]);
        let source = table(
            vec!["id", "hash__all"],
            vec![
                vec![Value::Int(1), Value::Str("aa".into())],
                vec![Value::Int(3), Value::Str("cc".into())],
            ],
        );
        let target = table(
            vec!["id", "hash__all"],
            vec![
                vec![Value::Int(1), Value::Str("aa".into())],
                vec![Value::Int(2), Value::Str("bb".into())],
            ],
        );

        let rows =
            align_and_classify(&plan, &Tolerances::default(), source, target, 10_000).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, ValidationStatus::Success);
        assert_eq!(rows[1].status, ValidationStatus::TargetOnly);
        assert!(rows[1].source_value.is_none());
        assert_eq!(rows[2].status, ValidationStatus::SourceOnly);
        assert!(rows[2].target_value.is_none());
    }

    #[test]
    fn test_hash_mismatch_fails_per_key() {
        let plan = plan_with(vec!["id"], vec![("hash__all", Comparison::Text)]);
        let source = table(
            vec!["id", "hash__all"],
            vec![
                vec![Value::Int(1), Value::Str("ada".into())],
                vec![Value::Int(2), Value::Str("grace".into())],
            ],
        );
        let target = table(
            vec!["id", "hash__all"],
            vec![
                vec![Value::Int(1), Value::Str("ada".into())],
                vec![Value::Int(2), Value::Str("GRACE".into())],
            ],
        );

        let rows =
            align_and_classify(&plan, &Tolerances::default(), source, target, 10_000).unwrap();
        assert_eq!(rows[0].status, ValidationStatus::Success);
        assert_eq!(rows[1].status, ValidationStatus::Fail);
        assert!(rows[1].difference.is_none());
    }

    #[test]
    fn test_null_equals_null_is_configurable() {
        let plan = plan_with(vec![], vec![("max_note", Comparison::Text)]);
        let make = || {
            (
                table(vec!["max_note"], vec![vec![Value::Null]]),
                table(vec!["max_note"], vec![vec![Value::Null]]),
            )
        };

        let (source, target) = make();
        let rows =
            align_and_classify(&plan, &Tolerances::default(), source, target, 10_000).unwrap();
        assert_eq!(rows[0].status, ValidationStatus::Success);

        let strict = Tolerances {
            null_equals_null: false,
            ..Tolerances::default()
        };
        let (source, target) = make();
        let rows = align_and_classify(&plan, &strict, source, target, 10_000).unwrap();
        assert_eq!(rows[0].status, ValidationStatus::Fail);
    }

    #[test]
    fn test_null_group_keys_align_with_each_other() {
        let plan = plan_with(vec!["region"], vec![("sum_amount", Comparison::Numeric)]);
        let source = table(
            vec!["region", "sum_amount"],
            vec![
                vec![Value::Null, Value::Int(5)],
                vec![Value::Str("emea".into()), Value::Int(7)],
            ],
        );
        let target = table(
            vec!["region", "sum_amount"],
            vec![
                vec![Value::Str("emea".into()), Value::Int(7)],
                vec![Value::Null, Value::Int(5)],
            ],
        );

        let rows =
            align_and_classify(&plan, &Tolerances::default(), source, target, 10_000).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == ValidationStatus::Success));
        // Null group sorts first.
        assert!(rows[0].group_key[0].1.is_null());
    }

    #[test]
    fn test_duplicate_keys_collapse_to_one_row() {
        let plan = plan_with(vec!["id"], vec![("hash__all", Comparison::Text)]);
        let source = table(
            vec!["id", "hash__all"],
            vec![
                vec![Value::Int(1), Value::Str("x".into())],
                vec![Value::Int(1), Value::Str("x".into())],
            ],
        );
        let target = table(
            vec!["id", "hash__all"],
            vec![vec![Value::Int(1), Value::Str("x".into())]],
        );

        let rows =
            align_and_classify(&plan, &Tolerances::default(), source, target, 10_000).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_spilled_alignment_matches_in_memory() {
        let plan = plan_with(vec!["id"], vec![("v", Comparison::Numeric)]);
        let rows_for = |n: i64| {
            (0..n)
                .map(|i| vec![Value::Int(i), Value::Int(i * 2)])
                .collect::<Vec<_>>()
        };
        let source = table(vec!["id", "v"], rows_for(50));
        let target = table(vec!["id", "v"], rows_for(50));

        // Budget of 10 forces both sides through the spill path.
        let spilled = align_and_classify(
            &plan,
            &Tolerances::default(),
            source.clone(),
            target.clone(),
            10,
        )
        .unwrap();
        let in_memory =
            align_and_classify(&plan, &Tolerances::default(), source, target, 10_000).unwrap();
        assert_eq!(spilled, in_memory);
        assert_eq!(spilled.len(), 50);
    }

    #[test]
    fn test_ordering_is_keys_then_alias() {
        let plan = plan_with(
            vec!["id"],
            vec![("b_metric", Comparison::Numeric), ("a_metric", Comparison::Numeric)],
        );
        let make = || {
            table(
                vec!["id", "b_metric", "a_metric"],
                vec![
                    vec![Value::Int(2), Value::Int(1), Value::Int(1)],
                    vec![Value::Int(1), Value::Int(1), Value::Int(1)],
                ],
            )
        };
        let rows =
            align_and_classify(&plan, &Tolerances::default(), make(), make(), 10_000).unwrap();
        let labels: Vec<(String, String)> = rows
            .iter()
            .map(|r| (r.group_key[0].1.render(), r.alias.clone()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("1".to_string(), "a_metric".to_string()),
                ("1".to_string(), "b_metric".to_string()),
                ("2".to_string(), "a_metric".to_string()),
                ("2".to_string(), "b_metric".to_string()),
            ]
        );
    }

    #[test]
    fn test_tolerance_monotonicity_spot_check() {
        let tolerances = |abs: f64| Tolerances {
            abs_tol: abs,
            ..Tolerances::default()
        };
        assert!(!numeric_within_tolerance(10.0, 10.5, &tolerances(0.1)));
        assert!(numeric_within_tolerance(10.0, 10.5, &tolerances(0.5)));
        assert!(numeric_within_tolerance(10.0, 10.5, &tolerances(5.0)));
    }
}
