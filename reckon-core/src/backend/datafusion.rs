//! DataFusion-backed engine adapter.
//!
//! `DataFusionBackend` wraps a [`SessionContext`] and serves both as the
//! in-process execution engine for registered tables and as the reference
//! implementation of the [`Backend`] capability set. Tables are registered on
//! the context by the caller (CSV/Parquet/memory providers, external table
//! providers); the backend itself only plans and executes.

use async_trait::async_trait;
use datafusion::error::DataFusionError;
use datafusion::prelude::*;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use crate::backend::{Backend, ColumnDef, DialectFeatures, TableSchema};
use crate::error::{ReckonError, Result};
use crate::query::{render_sql, LogicalQuery, QuoteStyle, SqlDialect};
use crate::table::Table;
use crate::types::{LogicalType, TypeMap};

const DEFAULT_CATALOG: &str = "datafusion";
const DEFAULT_SCHEMA: &str = "public";

/// A [`Backend`] over a DataFusion session context.
pub struct DataFusionBackend {
    name: String,
    ctx: SessionContext,
    features: DialectFeatures,
    types: TypeMap,
}

impl std::fmt::Debug for DataFusionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFusionBackend")
            .field("name", &self.name)
            .field("ctx", &"SessionContext")
            .field("features", &self.features)
            .field("types", &self.types)
            .finish()
    }
}

impl DataFusionBackend {
    /// Wraps an existing session context.
    pub fn new(name: impl Into<String>, ctx: SessionContext) -> Self {
        Self {
            name: name.into(),
            ctx,
            features: DialectFeatures::default(),
            types: TypeMap::ansi(),
        }
    }

    /// Overrides the advertised dialect features.
    ///
    /// Useful in tests and when the context is backed by a federated engine
    /// with narrower capabilities than stock DataFusion.
    pub fn with_features(mut self, features: DialectFeatures) -> Self {
        self.features = features;
        self
    }

    /// The underlying session context, for registering tables.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Classifies a DataFusion error into the transient/fatal taxonomy.
    fn classify(&self, err: DataFusionError) -> ReckonError {
        match &err {
            DataFusionError::IoError(_) | DataFusionError::ResourcesExhausted(_) => {
                ReckonError::BackendTransient {
                    backend: self.name.clone(),
                    message: err.to_string(),
                    source: Some(Box::new(err)),
                }
            }
            _ => ReckonError::BackendFatal {
                backend: self.name.clone(),
                message: err.to_string(),
                source: Some(Box::new(err)),
            },
        }
    }

    fn schema_provider(
        &self,
        database: Option<&str>,
    ) -> Result<std::sync::Arc<dyn datafusion::catalog::SchemaProvider>> {
        let catalog = self.ctx.catalog(DEFAULT_CATALOG).ok_or_else(|| {
            ReckonError::fatal(&self.name, format!("catalog '{DEFAULT_CATALOG}' not found"))
        })?;
        let schema_name = database.unwrap_or(DEFAULT_SCHEMA);
        catalog.schema(schema_name).ok_or_else(|| {
            ReckonError::fatal(&self.name, format!("database '{schema_name}' not found"))
        })
    }

    fn df_schema_to_table_schema(
        fields: impl IntoIterator<Item = (String, arrow::datatypes::DataType, bool)>,
    ) -> Result<TableSchema> {
        let columns = fields
            .into_iter()
            .map(|(name, dt, nullable)| {
                Ok(ColumnDef {
                    name,
                    ty: LogicalType::from_arrow(&dt)?,
                    nullable,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TableSchema::new(columns))
    }
}

#[async_trait]
impl Backend for DataFusionBackend {
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

    async fn list_databases(&self, like: Option<&str>) -> Result<BTreeSet<String>> {
        let catalog = self.ctx.catalog(DEFAULT_CATALOG).ok_or_else(|| {
            ReckonError::fatal(&self.name, format!("catalog '{DEFAULT_CATALOG}' not found"))
        })?;
        Ok(catalog
            .schema_names()
            .into_iter()
            .filter(|name| like.map_or(true, |pat| name.contains(pat)))
            .collect())
    }

    async fn list_tables(
        &self,
        like: Option<&str>,
        database: Option<&str>,
    ) -> Result<BTreeSet<String>> {
        let schema = self.schema_provider(database)?;
        Ok(schema
            .table_names()
            .into_iter()
            .filter(|name| like.map_or(true, |pat| name.contains(pat)))
            .collect())
    }

    async fn get_schema(&self, table: &str, database: Option<&str>) -> Result<TableSchema> {
        let schema = self.schema_provider(database)?;
        let provider = schema
            .table(table)
            .await
            .map_err(|e| self.classify(e))?
            .ok_or_else(|| ReckonError::fatal(&self.name, format!("table '{table}' not found")))?;
        let arrow_schema = provider.schema();
        Self::df_schema_to_table_schema(
            arrow_schema
                .fields()
                .iter()
                .map(|f| (f.name().clone(), f.data_type().clone(), f.is_nullable())),
        )
    }

    async fn query_schema(&self, sql: &str) -> Result<TableSchema> {
        // Planning only: the DataFrame is never collected.
        let df = self.ctx.sql(sql).await.map_err(|e| self.classify(e))?;
        Self::df_schema_to_table_schema(
            df.schema()
                .fields()
                .iter()
                .map(|f| (f.name().clone(), f.data_type().clone(), f.is_nullable())),
        )
    }

    #[instrument(skip(self, query), fields(backend = %self.name))]
    async fn execute(&self, query: &LogicalQuery) -> Result<Table> {
        let dialect = SqlDialect {
            quote: self.quote_style(),
            types: &self.types,
            features: &self.features,
        };
        let sql = render_sql(query, &dialect)?;
        debug!("executing rendered query: {sql}");

        let df = self.ctx.sql(&sql).await.map_err(|e| self.classify(e))?;
        let batches = df.collect().await.map_err(|e| self.classify(e))?;
        Table::from_batches(&batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Relation, ScalarExpr, SelectExpr, TableRef};
    use crate::value::Value;

    async fn backend_with_orders() -> Result<DataFusionBackend> {
        let ctx = SessionContext::new();
        ctx.sql("CREATE TABLE orders (id BIGINT NOT NULL, amount DOUBLE, region STRING)")
            .await?
            .collect()
            .await?;
        ctx.sql(
            "INSERT INTO orders VALUES (1, 10.5, 'EMEA'), (2, 20.0, 'APAC'), (3, NULL, 'EMEA')",
        )
        .await?
        .collect()
        .await?;
        Ok(DataFusionBackend::new("local", ctx))
    }

    #[tokio::test]
    async fn test_list_tables_and_filter() -> Result<()> {
        let backend = backend_with_orders().await?;
        let tables = backend.list_tables(None, None).await?;
        assert!(tables.contains("orders"));
        let filtered = backend.list_tables(Some("ord"), None).await?;
        assert_eq!(filtered.len(), 1);
        let none = backend.list_tables(Some("zzz"), None).await?;
        assert!(none.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_get_schema_reports_types_and_nullability() -> Result<()> {
        let backend = backend_with_orders().await?;
        let schema = backend.get_schema("orders", None).await?;
        let id = schema.column("id").unwrap();
        assert_eq!(id.ty, LogicalType::Int64);
        assert!(!id.nullable);
        let amount = schema.column("amount").unwrap();
        assert_eq!(amount.ty, LogicalType::Float64);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_table_is_fatal() -> Result<()> {
        let backend = backend_with_orders().await?;
        let err = backend.get_schema("absent", None).await.unwrap_err();
        assert!(matches!(err, ReckonError::BackendFatal { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_execute_logical_query() -> Result<()> {
        let backend = backend_with_orders().await?;
        let query = LogicalQuery::new(
            Relation::Table(TableRef::new("orders")),
            vec![SelectExpr {
                expr: ScalarExpr::Aggregate {
                    function: crate::query::AggregateFunction::Count,
                    arg: None,
                    distinct: false,
                },
                alias: "row_count".to_string(),
            }],
        );
        let table = backend.execute(&query).await?;
        assert_eq!(table.columns(), &["row_count"]);
        assert_eq!(table.rows()[0][0], Value::Int(3));
        Ok(())
    }

    #[tokio::test]
    async fn test_query_schema_does_not_execute() -> Result<()> {
        let backend = backend_with_orders().await?;
        let schema = backend
            .query_schema("SELECT id, region FROM orders")
            .await?;
        assert_eq!(schema.columns().len(), 2);
        assert!(schema.contains("region"));
        Ok(())
    }
}
