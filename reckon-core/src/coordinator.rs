//! Execution coordinator.
//!
//! Drives one validation run through its state machine:
//!
//! ```text
//! NEW → PLANNING → DISPATCHED → ALIGNING → CLASSIFIED → DONE
//!          │
//!          └─ any fatal → FAILED (terminal)
//! ```
//!
//! In `DISPATCHED` the source and target queries run concurrently as two
//! cooperative tasks joined on the coordinator's task; the sides share only a
//! cancellation flag, observed at every suspension point. Transient backend
//! errors are retried exactly once with a fixed back-off; a wall-clock
//! timeout cancels both sides and surfaces as a single `fail` row labelled
//! `error=timeout`.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::backend::Backend;
use crate::comparator::{align_and_classify, AlignedRow};
use crate::error::{ReckonError, Result};
use crate::planner::{plan, SidePlan, SideTask, ValidationPlan, SCHEMA_COLUMN_NAME, SCHEMA_COLUMN_TYPE};
use crate::result::{next_run_id, ResultRow, ResultTable, ValidationStatus};
use crate::spec::ValidationSpec;
use crate::table::Table;
use crate::value::Value;

/// Lifecycle states of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    New,
    Planning,
    Dispatched,
    Aligning,
    Classified,
    Done,
    Failed,
}

/// Tunables for one coordinator.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Per-run wall-clock timeout.
    pub timeout: Duration,
    /// Rows per side above which the aligner spills to disk.
    pub row_budget: usize,
    /// Back-off before the single transient retry.
    pub retry_backoff: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            row_budget: 1_000_000,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Summary facts about a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: u64,
    pub state: RunState,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Rows excluded per side for null primary keys.
    pub skipped_rows_source: u64,
    pub skipped_rows_target: u64,
    /// Populated when the run ended on a fatal error.
    pub fatal: Option<String>,
}

/// The product of one validation run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub table: ResultTable,
    pub summary: RunSummary,
}

impl RunOutcome {
    /// Process exit code for CLI callers: 0 when every row succeeded, 2 when
    /// at least one row failed classification, 3 when a fatal error
    /// prevented classification.
    pub fn exit_code(&self) -> i32 {
        if self.summary.fatal.is_some() {
            3
        } else if self.table.all_succeeded() {
            0
        } else {
            2
        }
    }
}

/// One side's execution product.
#[derive(Debug)]
struct SideResult {
    table: Table,
    skipped_rows: u64,
}

/// Coordinates validation runs against pairs of backends.
#[derive(Debug, Clone, Default)]
pub struct Coordinator {
    options: RunOptions,
}

impl Coordinator {
    /// A coordinator with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// A coordinator with explicit options.
    pub fn with_options(options: RunOptions) -> Self {
        Self { options }
    }

    /// Runs one validation spec against a source and a target backend.
    ///
    /// Spec and planning failures return `Err` — no run starts. Execution
    /// failures (backend fatal, timeout) complete the run with a single
    /// surfaced result row and a populated `fatal` summary.
    #[instrument(skip_all, fields(validation = %spec.name))]
    pub async fn run(
        &self,
        spec: &ValidationSpec,
        source: Arc<dyn Backend>,
        target: Arc<dyn Backend>,
    ) -> Result<RunOutcome> {
        let run_id = next_run_id();
        let start_time = Utc::now();
        let mut state = RunState::New;
        debug!(run_id, "run created");

        transition(&mut state, RunState::Planning);
        let plan = plan(spec, source.as_ref(), target.as_ref()).await?;

        transition(&mut state, RunState::Dispatched);
        info!(run_id, "dispatching source and target queries");
        let cancel = Arc::new(AtomicBool::new(false));

        let source_fut = run_side(
            Arc::clone(&source),
            plan.source.clone(),
            Arc::clone(&cancel),
            self.options.retry_backoff,
        );
        let target_fut = run_side(
            Arc::clone(&target),
            plan.target.clone(),
            Arc::clone(&cancel),
            self.options.retry_backoff,
        );

        let joined = timeout(self.options.timeout, async {
            tokio::join!(source_fut, target_fut)
        })
        .await;

        let (source_result, target_result) = match joined {
            Ok(results) => results,
            Err(_) => {
                // Both side futures were dropped at their suspension points.
                cancel.store(true, Ordering::SeqCst);
                warn!(run_id, "run timed out, both sides cancelled");
                let elapsed = self.options.timeout.as_secs();
                return Ok(self.fatal_outcome(
                    spec,
                    &plan,
                    run_id,
                    start_time,
                    ValidationStatus::Fail,
                    "timeout".to_string(),
                    format!("validation run timed out after {elapsed}s"),
                ));
            }
        };

        let (source_side, target_side) = match (source_result, target_result) {
            (Ok(s), Ok(t)) => (s, t),
            (Err(source_err), Ok(_)) => {
                // Rows already produced by the surviving target are discarded.
                return Ok(self.fatal_outcome(
                    spec,
                    &plan,
                    run_id,
                    start_time,
                    ValidationStatus::TargetOnly,
                    source_err.to_string(),
                    format!("source side failed: {source_err}"),
                ));
            }
            (Ok(_), Err(target_err)) => {
                return Ok(self.fatal_outcome(
                    spec,
                    &plan,
                    run_id,
                    start_time,
                    ValidationStatus::SourceOnly,
                    target_err.to_string(),
                    format!("target side failed: {target_err}"),
                ));
            }
            (Err(source_err), Err(target_err)) => {
                return Ok(self.fatal_outcome(
                    spec,
                    &plan,
                    run_id,
                    start_time,
                    ValidationStatus::Fail,
                    format!("source: {source_err}; target: {target_err}"),
                    "both sides failed".to_string(),
                ));
            }
        };

        transition(&mut state, RunState::Aligning);
        let aligned = align_and_classify(
            &plan,
            &spec.tolerances,
            source_side.table,
            target_side.table,
            self.options.row_budget,
        )?;

        transition(&mut state, RunState::Classified);
        let end_time = Utc::now();
        let rows = build_rows(spec, &plan, &aligned, run_id, start_time, end_time);

        transition(&mut state, RunState::Done);
        info!(run_id, rows = rows.len(), "run complete");
        Ok(RunOutcome {
            table: ResultTable::new(rows),
            summary: RunSummary {
                run_id,
                state,
                start_time,
                end_time,
                skipped_rows_source: source_side.skipped_rows,
                skipped_rows_target: target_side.skipped_rows,
                fatal: None,
            },
        })
    }

    /// Builds the single surfaced row for a run that ended fatally.
    #[allow(clippy::too_many_arguments)]
    fn fatal_outcome(
        &self,
        spec: &ValidationSpec,
        plan: &ValidationPlan,
        run_id: u64,
        start_time: DateTime<Utc>,
        status: ValidationStatus,
        error: String,
        fatal: String,
    ) -> RunOutcome {
        let end_time = Utc::now();
        let mut labels = spec.labels.clone();
        labels.insert("error".to_string(), error);

        let row = ResultRow {
            validation_name: spec.name.clone(),
            validation_type: spec.kind.label().to_string(),
            aggregation_type: None,
            source_table_name: plan.source.table_name.clone(),
            target_table_name: plan.target.table_name.clone(),
            source_column_name: None,
            target_column_name: None,
            group_by_columns: None,
            source_agg_value: None,
            target_agg_value: None,
            difference: None,
            pct_difference: None,
            validation_status: status,
            run_id,
            start_time,
            end_time,
            labels,
        };

        RunOutcome {
            table: ResultTable::new(vec![row]),
            summary: RunSummary {
                run_id,
                state: RunState::Failed,
                start_time,
                end_time,
                skipped_rows_source: 0,
                skipped_rows_target: 0,
                fatal: Some(fatal),
            },
        }
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = ?state, to = ?next, "state transition");
    *state = next;
}

/// Executes one side's task, observing the shared cancellation flag at every
/// suspension point and retrying a transient failure exactly once.
async fn run_side(
    backend: Arc<dyn Backend>,
    side: SidePlan,
    cancel: Arc<AtomicBool>,
    backoff: Duration,
) -> Result<SideResult> {
    let check_cancel = || {
        if cancel.load(Ordering::SeqCst) {
            Err(ReckonError::fatal(
                backend.name(),
                "cancelled by peer failure",
            ))
        } else {
            Ok(())
        }
    };

    check_cancel()?;

    let table = match &side.task {
        SideTask::SchemaFetch(table_ref) => {
            let fetched = with_retry(
                || backend.get_schema(&table_ref.name, table_ref.database.as_deref()),
                &cancel,
                backoff,
            )
            .await;
            match fetched {
                Ok(schema) => synthesize_schema_table(&schema),
                Err(err) => {
                    cancel.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }
        SideTask::Query(query) => {
            match with_retry(|| backend.execute(query), &cancel, backoff).await {
                Ok(table) => table,
                Err(err) => {
                    cancel.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }
    };

    check_cancel()?;

    let skipped_rows = match &side.skipped_rows {
        None => 0,
        Some(query) => {
            match with_retry(|| backend.execute(query), &cancel, backoff).await {
                Ok(table) => table
                    .rows()
                    .first()
                    .and_then(|row| row.first())
                    .and_then(|v| v.as_f64())
                    .map(|v| v as u64)
                    .unwrap_or(0),
                Err(err) => {
                    cancel.store(true, Ordering::SeqCst);
                    return Err(err);
                }
            }
        }
    };

    Ok(SideResult {
        table,
        skipped_rows,
    })
}

/// Calls a backend operation, retrying once after the back-off when the
/// failure is transient. A second failure escalates to fatal.
async fn with_retry<T, F, Fut>(mut call: F, cancel: &AtomicBool, backoff: Duration) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(err) if err.is_transient() => {
            warn!("transient backend error, retrying once: {err}");
            sleep(backoff).await;
            if cancel.load(Ordering::SeqCst) {
                return Err(err.escalate());
            }
            call().await.map_err(ReckonError::escalate)
        }
        Err(err) => Err(err),
    }
}

/// Synthesizes the `(column_name, column_type)` table for schema validation.
fn synthesize_schema_table(schema: &crate::backend::TableSchema) -> Table {
    let rows = schema
        .columns()
        .iter()
        .map(|c| {
            vec![
                Value::Str(c.name.clone()),
                Value::Str(c.ty.to_string()),
            ]
        })
        .collect();
    Table::new(
        vec![
            SCHEMA_COLUMN_NAME.to_string(),
            SCHEMA_COLUMN_TYPE.to_string(),
        ],
        rows,
    )
}

/// Assembles canonical result rows from the classified alignment.
fn build_rows(
    spec: &ValidationSpec,
    plan: &ValidationPlan,
    aligned: &[AlignedRow],
    run_id: u64,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Vec<ResultRow> {
    let columns: BTreeMap<&str, &crate::planner::ValueColumn> = plan
        .value_columns
        .iter()
        .map(|vc| (vc.alias.as_str(), vc))
        .collect();

    aligned
        .iter()
        .map(|row| {
            let vc = columns.get(row.alias.as_str());
            let mut labels = spec.labels.clone();
            if vc.map(|vc| vc.truncated).unwrap_or(false) {
                labels.insert("truncated".to_string(), "true".to_string());
            }

            let group_by_columns = if row.group_key.is_empty() {
                None
            } else {
                let map: serde_json::Map<String, serde_json::Value> = row
                    .group_key
                    .iter()
                    .map(|(name, value)| {
                        let rendered = if value.is_null() {
                            serde_json::Value::Null
                        } else {
                            json!(value.render())
                        };
                        (name.clone(), rendered)
                    })
                    .collect();
                Some(serde_json::Value::Object(map).to_string())
            };

            ResultRow {
                validation_name: spec.name.clone(),
                validation_type: spec.kind.label().to_string(),
                aggregation_type: vc.and_then(|vc| vc.aggregation_type.clone()),
                source_table_name: plan.source.table_name.clone(),
                target_table_name: plan.target.table_name.clone(),
                source_column_name: vc.and_then(|vc| vc.source_column.clone()),
                target_column_name: vc.and_then(|vc| vc.target_column.clone()),
                group_by_columns,
                source_agg_value: row.source_value.as_ref().map(Value::render),
                target_agg_value: row.target_value.as_ref().map(Value::render),
                difference: row.difference,
                pct_difference: row.pct_difference,
                validation_status: row.status,
                run_id,
                start_time,
                end_time,
                labels,
            }
        })
        .collect()
}
