//! # Reckon - Cross-Database Data Validation
//!
//! Reckon reconciles two tabular data sources — potentially in different
//! database engines — by computing comparable statistics or row-level
//! fingerprints on each side and classifying every comparison as success,
//! fail, source-only or target-only within configured numeric and string
//! tolerances.
//!
//! ## Overview
//!
//! A validation is declared once as a [`spec::ValidationSpec`] and planned
//! into a pair of equivalent logical queries, one per side. The
//! [`coordinator::Coordinator`] executes both queries concurrently, aligns
//! the results on a join key with a streaming merge-join, and emits the
//! canonical result table consumed by result handlers.
//!
//! ```text
//! ValidationSpec → planner → {source query, target query}
//!                               │ concurrent execution
//!                               ▼
//!                    comparator (merge-join + tolerances)
//!                               │
//!                               ▼
//!                    ResultTable → ResultHandler
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reckon_core::prelude::*;
//! use reckon_core::query::TableRef;
//! use reckon_core::spec::AggregateSpec;
//! use datafusion::prelude::SessionContext;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! // Wrap each side's engine in a backend.
//! let source = Arc::new(DataFusionBackend::new("source", SessionContext::new()));
//! let target = Arc::new(DataFusionBackend::new("target", SessionContext::new()));
//!
//! // Declare what to compare.
//! let spec = ValidationSpec::builder("orders_count", ValidationKind::Column)
//!     .source_table(TableRef::new("orders"))
//!     .target_table(TableRef::new("orders"))
//!     .aggregate(AggregateSpec::count_star("row_count"))
//!     .build()?;
//!
//! // Run it and hand the result to a sink.
//! let outcome = Coordinator::new().run(&spec, source, target).await?;
//! StdoutHandler::new().handle(&outcome.table, &spec)?;
//! std::process::exit(outcome.exit_code());
//! # }
//! ```
//!
//! ## Validation shapes
//!
//! - **Column**: one aggregate value per column (optionally partitioned by
//!   group columns) compared within numeric tolerances.
//! - **Row**: a SHA-256 fingerprint per primary-key tuple over canonicalised
//!   column values ([`pipeline`]).
//! - **Schema**: column names and logical types only.
//! - **Custom query**: user-supplied SQL on each side, with row or column
//!   semantics depending on whether primary keys are declared.
//!
//! ## Backends
//!
//! Any engine is attached by implementing the [`backend::Backend`] capability
//! set; [`backend::DataFusionBackend`] is the in-process reference adapter.
//! Dialect differences travel as data (feature flags, quoting style, type
//! names), not as subclasses.

pub mod backend;
pub mod comparator;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod planner;
pub mod prelude;
pub mod query;
pub mod result;
pub mod sink;
pub mod spec;
pub mod table;
pub mod types;
pub mod value;

pub use error::{ReckonError, Result};
