//! Coordinator behaviour under backend failure: transient retry, fatal
//! aborts, and run timeouts. Uses a scriptable mock backend so failure
//! injection is deterministic.

use async_trait::async_trait;
use reckon_core::backend::{Backend, ColumnDef, DialectFeatures, TableSchema};
use reckon_core::prelude::*;
use reckon_core::query::{LogicalQuery, QuoteStyle, TableRef};
use reckon_core::spec::AggregateSpec;
use reckon_core::table::Table;
use reckon_core::types::{LogicalType, TypeMap};
use reckon_core::value::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the mock does on each `execute` call.
#[derive(Debug, Clone)]
enum Script {
    /// Always return a one-cell table with this count.
    Count(i64),
    /// Fail transiently on the first call, then return the count.
    TransientThenCount(i64),
    /// Fail transiently on every call.
    AlwaysTransient,
    /// Fail fatally on every call.
    Fatal,
    /// Never complete (until cancelled from outside).
    Hang,
}

#[derive(Debug)]
struct MockBackend {
    name: String,
    features: DialectFeatures,
    types: TypeMap,
    script: Script,
    calls: AtomicUsize,
}

impl MockBackend {
    fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            features: DialectFeatures::default(),
            types: TypeMap::ansi(),
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn count_table(count: i64) -> Table {
        Table::new(
            vec!["row_count".to_string()],
            vec![vec![Value::Int(count)]],
        )
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> &DialectFeatures {
        &self.features
    }

    fn quote_style(&self) -> QuoteStyle {
        QuoteStyle::Double
    }

    fn type_map(&self) -> &TypeMap {
        &self.types
    }

    async fn list_databases(&self, _like: Option<&str>) -> Result<BTreeSet<String>> {
        Ok(BTreeSet::new())
    }

    async fn list_tables(
        &self,
        _like: Option<&str>,
        _database: Option<&str>,
    ) -> Result<BTreeSet<String>> {
        Ok(["orders".to_string()].into())
    }

    async fn get_schema(&self, _table: &str, _database: Option<&str>) -> Result<TableSchema> {
        Ok(TableSchema::new(vec![ColumnDef {
            name: "id".to_string(),
            ty: LogicalType::Int64,
            nullable: false,
        }]))
    }

    async fn query_schema(&self, _sql: &str) -> Result<TableSchema> {
        self.get_schema("orders", None).await
    }

    async fn execute(&self, _query: &LogicalQuery) -> Result<Table> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Count(n) => Ok(Self::count_table(*n)),
            Script::TransientThenCount(n) => {
                if call == 0 {
                    Err(ReckonError::transient(&self.name, "connection reset"))
                } else {
                    Ok(Self::count_table(*n))
                }
            }
            Script::AlwaysTransient => {
                Err(ReckonError::transient(&self.name, "connection reset"))
            }
            Script::Fatal => Err(ReckonError::fatal(&self.name, "permission denied")),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ReckonError::fatal(&self.name, "unreachable"))
            }
        }
    }
}

fn count_spec() -> ValidationSpec {
    ValidationSpec::builder("orders_count", ValidationKind::Column)
        .source_table(TableRef::new("orders"))
        .target_table(TableRef::new("orders"))
        .aggregate(AggregateSpec::count_star("row_count"))
        .build()
        .unwrap()
}

fn fast_options() -> RunOptions {
    RunOptions {
        timeout: Duration::from_millis(500),
        row_budget: 10_000,
        retry_backoff: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_transient_error_is_retried_once_and_recovers() -> Result<()> {
    let source = MockBackend::new("src", Script::TransientThenCount(42));
    let target = MockBackend::new("tgt", Script::Count(42));

    let outcome = Coordinator::with_options(fast_options())
        .run(&count_spec(), source.clone(), target)
        .await?;

    assert!(outcome.table.all_succeeded());
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_second_transient_failure_escalates_to_fatal() -> Result<()> {
    let source = MockBackend::new("src", Script::AlwaysTransient);
    let target = MockBackend::new("tgt", Script::Count(42));

    let outcome = Coordinator::with_options(fast_options())
        .run(&count_spec(), source.clone(), target)
        .await?;

    assert_eq!(outcome.exit_code(), 3);
    assert!(outcome.summary.fatal.is_some());
    // One initial attempt plus exactly one retry.
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    let row = &outcome.table.rows()[0];
    assert!(row.labels.get("error").unwrap().contains("retry exhausted"));
    Ok(())
}

#[tokio::test]
async fn test_source_fatal_surfaces_surviving_side() -> Result<()> {
    let source = MockBackend::new("src", Script::Fatal);
    let target = MockBackend::new("tgt", Script::Count(42));

    let outcome = Coordinator::with_options(fast_options())
        .run(&count_spec(), source, target)
        .await?;

    assert_eq!(outcome.table.len(), 1);
    let row = &outcome.table.rows()[0];
    // The source failed, so only the target side holds data.
    assert_eq!(row.validation_status, ValidationStatus::TargetOnly);
    assert!(row.labels.get("error").unwrap().contains("permission denied"));
    assert!(row.source_agg_value.is_none());
    assert_eq!(outcome.exit_code(), 3);
    Ok(())
}

#[tokio::test]
async fn test_target_fatal_surfaces_surviving_side() -> Result<()> {
    let source = MockBackend::new("src", Script::Count(42));
    let target = MockBackend::new("tgt", Script::Fatal);

    let outcome = Coordinator::with_options(fast_options())
        .run(&count_spec(), source, target)
        .await?;

    let row = &outcome.table.rows()[0];
    assert_eq!(row.validation_status, ValidationStatus::SourceOnly);
    assert_eq!(outcome.exit_code(), 3);
    Ok(())
}

#[tokio::test]
async fn test_timeout_yields_single_fail_row_and_exit_code_3() -> Result<()> {
    let source = MockBackend::new("src", Script::Hang);
    let target = MockBackend::new("tgt", Script::Count(42));

    let outcome = Coordinator::with_options(RunOptions {
        timeout: Duration::from_millis(100),
        ..fast_options()
    })
    .run(&count_spec(), source, target)
    .await?;

    assert_eq!(outcome.table.len(), 1);
    let row = &outcome.table.rows()[0];
    assert_eq!(row.validation_status, ValidationStatus::Fail);
    assert_eq!(row.labels.get("error").map(String::as_str), Some("timeout"));
    assert_eq!(outcome.exit_code(), 3);
    Ok(())
}

#[tokio::test]
async fn test_peer_failure_cancels_pending_retry() -> Result<()> {
    // Source fails fatally at once; the target's transient retry observes
    // the cancellation flag after its back-off and gives up.
    let source = MockBackend::new("src", Script::Fatal);
    let target = MockBackend::new("tgt", Script::AlwaysTransient);

    let outcome = Coordinator::with_options(RunOptions {
        retry_backoff: Duration::from_millis(100),
        ..fast_options()
    })
    .run(&count_spec(), source, target.clone())
    .await?;

    assert_eq!(outcome.exit_code(), 3);
    // The target never got its retry call: one attempt only.
    assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_spec_errors_fail_before_any_run() {
    let err = ValidationSpec::builder("bad", ValidationKind::Column)
        .source_table(TableRef::new("orders"))
        .target_table(TableRef::new("orders"))
        .build()
        .unwrap_err();
    assert!(matches!(err, ReckonError::SpecInvalid { .. }));
}
