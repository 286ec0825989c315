//! Backend capability interface.
//!
//! A [`Backend`] abstracts one SQL engine: list catalogs, describe tables,
//! execute a logical query and return a labeled table. There is exactly one
//! capability trait — per-engine behaviour lives in the dialect data each
//! backend carries ([`DialectFeatures`], quoting style, type names), never in
//! additional virtual methods.
//!
//! Failure semantics divide into two classes: `BackendTransient` (worth one
//! retry by the coordinator) and `BackendFatal` (authorization, missing
//! table, SQL compilation — aborts the run).

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt::Debug;

use crate::error::Result;
use crate::query::{LogicalQuery, QuoteStyle};
use crate::table::Table;
use crate::types::{LogicalType, TypeMap};

mod datafusion;

pub use self::datafusion::DataFusionBackend;

/// Feature flags describing a dialect's capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectFeatures {
    pub supports_count_distinct: bool,
    pub supports_bit_xor: bool,
    pub supports_cte: bool,
    /// SHA-256 is mandatory for row validation; planning fails without it.
    pub supports_sha256: bool,
    pub timestamp_has_tz: bool,
    pub max_identifier_length: usize,
    /// Decimals wider than this are truncated, with a warning on the result.
    pub decimal_precision_cap: u8,
}

impl Default for DialectFeatures {
    fn default() -> Self {
        Self {
            supports_count_distinct: true,
            supports_bit_xor: false,
            supports_cte: true,
            supports_sha256: true,
            timestamp_has_tz: true,
            max_identifier_length: 128,
            decimal_precision_cap: 38,
        }
    }
}

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: LogicalType,
    pub nullable: bool,
}

/// An ordered table schema as reported by a backend.
///
/// Column names are unified to lower-case on construction so schema lookups
/// behave identically against case-sensitive and case-folding engines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Builds a schema, lower-casing every column name.
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        let columns = columns
            .into_iter()
            .map(|c| ColumnDef {
                name: c.name.to_lowercase(),
                ..c
            })
            .collect();
        Self { columns }
    }

    /// Ordered columns.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Looks up a column by case-insensitive name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        let lower = name.to_lowercase();
        self.columns.iter().find(|c| c.name == lower)
    }

    /// True when the schema has a column of this name.
    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// Capability set required of any SQL engine adapter.
#[async_trait]
pub trait Backend: Debug + Send + Sync {
    /// Short name used in errors, logs and result metadata.
    fn name(&self) -> &str;

    /// The dialect's feature flags.
    fn features(&self) -> &DialectFeatures;

    /// The dialect's identifier quoting style.
    fn quote_style(&self) -> QuoteStyle;

    /// SQL type names for this dialect.
    fn type_map(&self) -> &TypeMap;

    /// Quotes an identifier in this dialect.
    fn quote(&self, identifier: &str) -> String {
        self.quote_style().quote(identifier)
    }

    /// Lists databases (schemas), optionally filtered by a substring.
    async fn list_databases(&self, like: Option<&str>) -> Result<BTreeSet<String>>;

    /// Lists tables, optionally filtered by a substring and database.
    async fn list_tables(
        &self,
        like: Option<&str>,
        database: Option<&str>,
    ) -> Result<BTreeSet<String>>;

    /// Fetches the ordered schema of a table.
    async fn get_schema(&self, table: &str, database: Option<&str>) -> Result<TableSchema>;

    /// Resolves the output schema of an arbitrary SQL query without
    /// executing it. Needed to plan custom-query validations.
    async fn query_schema(&self, sql: &str) -> Result<TableSchema>;

    /// Executes a logical query and returns its labeled result.
    async fn execute(&self, query: &LogicalQuery) -> Result<Table>;
}
