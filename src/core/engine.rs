//! Generic SQL plugin
//!
//! [`SqlPlugin`] implements [`Plugin`] once for every SQL store. Everything
//! dialect-specific comes from the [`DialectFacts`] it is built with; the
//! converter, classifier and connection manager are constructed up front and
//! held explicitly.

use super::classifier::ErrorClassifier;
use super::config::PluginConfig;
use super::connection::{NativeConnection, QueryResult};
use super::convert::TypeConverter;
use super::database_types::DatabaseType;
use super::dialect::DialectFacts;
use super::error::{EngineError, Result};
use super::introspect::{value_u64, SchemaIntrospector};
use super::manager::{ConnectionHandle, ConnectionManager};
use super::model::{
    Column, ColumnConstraints, ForeignKeyRelationship, GetRowsResult, GraphUnit, ImportOptions,
    ImportResult, Record, StorageUnit,
};
use super::plugin::{ChatProvider, Plugin, RowReader, RowWriter, RowsRequest};
use super::query_builder::{BuiltQuery, QueryBuilder, SelectOptions};
use super::transaction::TransactionGuard;
use super::types::TypeSpec;
use super::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Future returned by a [`SqlPlugin::with_transaction`] body
pub type TxFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>;

/// Statements whose first keyword produces a result set
const ROW_RETURNING_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "PRAGMA", "EXPLAIN", "DESCRIBE", "DESC", "VALUES", "TABLE",
];

/// The generic engine behind every SQL dialect
pub struct SqlPlugin {
    dialect: Arc<dyn DialectFacts>,
    converter: TypeConverter,
    classifier: ErrorClassifier,
    manager: Arc<ConnectionManager>,
}

impl SqlPlugin {
    pub fn new(dialect: Arc<dyn DialectFacts>, manager: Arc<ConnectionManager>) -> Self {
        let database_type = dialect.database_type();
        Self {
            converter: TypeConverter::new(Arc::clone(&dialect)),
            classifier: ErrorClassifier::new(database_type),
            dialect,
            manager,
        }
    }

    pub fn dialect(&self) -> &dyn DialectFacts {
        self.dialect.as_ref()
    }

    pub fn converter(&self) -> &TypeConverter {
        &self.converter
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub(crate) fn builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.converter)
    }

    pub(crate) fn introspector(&self) -> SchemaIntrospector<'_> {
        SchemaIntrospector::new(self.dialect.as_ref())
    }

    /// Run `operation` on a pooled handle and classify any failure
    pub(crate) async fn run<T, F, Fut>(
        &self,
        config: &PluginConfig,
        operation: &str,
        details: &[(&str, String)],
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.manager
            .with_connection(config, f)
            .await
            .map_err(|e| self.classifier.classify(e, operation, details))
    }

    /// Run `operation` inside one transaction.
    ///
    /// Commits when the body succeeds and rolls back when it fails. A body
    /// abandoned by cancellation or deadline is rolled back when its handle is
    /// released.
    ///
    /// # Example
    ///
    /// ```ignore
    /// plugin
    ///     .with_transaction(&config, |conn| {
    ///         Box::pin(async move {
    ///             conn.execute("DELETE FROM audit", &[]).await?;
    ///             conn.execute("INSERT INTO audit (note) VALUES (?)", &["reset".into()]).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_transaction<T, F>(&self, config: &PluginConfig, operation: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut dyn NativeConnection) -> TxFuture<'c, T> + Send,
    {
        self.run(config, "with_transaction", &[], move |mut conn| async move {
            let mut tx = TransactionGuard::begin(&mut conn).await?;
            match operation(tx.connection()).await {
                Ok(value) => {
                    tx.commit().await?;
                    Ok(value)
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(target: "engine", error = %rollback, "Rollback after failed transaction body failed");
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    /// Display form of one result cell; geometry goes through the dialect first
    pub(crate) fn format_cell(&self, value: &Value, type_name: &str) -> String {
        if let Value::Bytes(raw) = value {
            if !raw.is_empty() && self.dialect.is_geometry_type(type_name) {
                if let Some(formatted) = self.dialect.format_geometry(raw, type_name) {
                    return formatted;
                }
            }
        }
        value.to_display_string()
    }

    pub(crate) fn to_rows_result(&self, result: QueryResult) -> GetRowsResult {
        let columns: Vec<Column> = result
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.type_name.to_uppercase()))
            .collect();
        let rows = result
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let ty = columns.get(i).map(|c| c.type_name.as_str()).unwrap_or_default();
                        self.format_cell(v, ty)
                    })
                    .collect()
            })
            .collect();
        GetRowsResult {
            columns,
            rows,
            total_count: None,
            disable_update: false,
        }
    }

    /// Select list for dialects that project columns explicitly
    pub(crate) fn projection(&self, ordered_types: &[(String, String)]) -> Result<Vec<String>> {
        if !self.dialect.needs_column_projection() {
            return Ok(Vec::new());
        }
        ordered_types
            .iter()
            .map(|(name, ty)| self.dialect.select_column_expression(name, ty))
            .collect()
    }
}

fn is_row_returning(query: &str) -> bool {
    let first = query
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_uppercase();
    ROW_RETURNING_KEYWORDS.contains(&first.as_str()) || query.to_uppercase().contains(" RETURNING ")
}

fn table_details(schema: &str, unit: &str) -> [(&'static str, String); 2] {
    [("schema", schema.to_string()), ("table", unit.to_string())]
}

#[async_trait]
impl Plugin for SqlPlugin {
    fn database_type(&self) -> DatabaseType {
        self.dialect.database_type()
    }

    async fn is_available(&self, config: &PluginConfig) -> bool {
        self.run(config, "is_available", &[], |mut conn| async move { conn.ping().await })
            .await
            .is_ok()
    }

    async fn get_databases(&self, config: &PluginConfig) -> Result<Vec<String>> {
        let intro = self.introspector();
        self.run(config, "get_databases", &[], move |mut conn| async move {
            intro.get_databases(&mut conn).await
        })
        .await
    }

    async fn get_all_schemas(&self, config: &PluginConfig) -> Result<Vec<String>> {
        let intro = self.introspector();
        self.run(config, "get_all_schemas", &[], move |mut conn| async move {
            intro.get_all_schemas(&mut conn).await
        })
        .await
    }

    async fn get_storage_units(&self, config: &PluginConfig, schema: &str) -> Result<Vec<StorageUnit>> {
        let intro = self.introspector();
        self.run(
            config,
            "get_storage_units",
            &[("schema", schema.to_string())],
            move |mut conn| async move { intro.get_storage_units(&mut conn, schema).await },
        )
        .await
    }

    async fn add_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        fields: &[Record],
    ) -> Result<bool> {
        self.create_storage_unit(config, schema, unit, fields).await
    }

    async fn add_row(&self, config: &PluginConfig, schema: &str, unit: &str, values: &[Record]) -> Result<bool> {
        self.insert_row(config, schema, unit, values).await
    }

    async fn update_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        values: &[Record],
        updated_columns: &[String],
    ) -> Result<bool> {
        self.modify_row(config, schema, unit, values, updated_columns).await
    }

    async fn delete_row(&self, config: &PluginConfig, schema: &str, unit: &str, values: &[Record]) -> Result<bool> {
        self.remove_row(config, schema, unit, values).await
    }

    async fn clear_table_data(&self, config: &PluginConfig, schema: &str, unit: &str) -> Result<bool> {
        self.clear_rows(config, schema, unit).await
    }

    async fn bulk_add_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        rows: &[Vec<Record>],
    ) -> Result<bool> {
        self.insert_rows(config, schema, unit, rows).await
    }

    /// One page of rows plus the total under the same filter.
    ///
    /// The page handle reads the column metadata, builds both statements and
    /// hands the count statement to a second handle, so the count and the page
    /// run concurrently. A failed count is logged and leaves `total_count`
    /// empty; a failed page fails the call.
    async fn get_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        request: &RowsRequest,
    ) -> Result<GetRowsResult> {
        let details = table_details(schema, unit);
        let full_table = self.dialect.build_full_table_name(schema, unit)?;
        let wants_types = request.condition.is_some() || self.dialect.needs_column_projection();
        let wants_keys = request.sort.is_empty() && self.dialect.orders_rows_by_primary_key();
        let (count_tx, count_rx) = oneshot::channel::<BuiltQuery>();

        let fetch = self.run(config, "get_rows", &details, move |mut conn| async move {
            let intro = self.introspector();
            let ordered_types = if wants_types {
                intro.get_ordered_column_types(&mut conn, schema, unit).await?
            } else {
                Vec::new()
            };
            let primary_keys = if wants_keys {
                intro.get_primary_keys(&mut conn, schema, unit).await
            } else {
                Vec::new()
            };
            let column_types: HashMap<String, String> = ordered_types.iter().cloned().collect();

            let builder = self.builder();
            let options = SelectOptions {
                projection: self.projection(&ordered_types)?,
                condition: request.condition.as_ref(),
                sort: &request.sort,
                default_order: self.dialect.rows_order_by(&primary_keys)?,
                limit: Some(request.page_size),
                offset: Some(request.page_offset),
            };
            let select = builder.select_query(&full_table, &options, &column_types)?;
            let count = builder.count_query(&full_table, request.condition.as_ref(), &column_types)?;
            // the receiver outlives this future under join!
            let _ = count_tx.send(count);
            debug!(target: "engine", sql = %select.sql, params = select.params.len(), "Fetching rows");
            conn.query(&select.sql, &select.params).await
        });
        let total = async {
            let count = count_rx
                .await
                .map_err(|_| EngineError::query("count statement was not built"))?;
            self.run(config, "get_rows.count", &details, move |mut conn| async move {
                conn.query(&count.sql, &count.params).await
            })
            .await
        };
        let (fetched, counted) = tokio::join!(fetch, total);

        let mut result = self.to_rows_result(fetched?);
        result.total_count = match counted {
            Ok(counted) => counted.rows.first().and_then(|r| r.first()).and_then(value_u64),
            Err(e) => {
                warn!(target: "engine", schema, table = unit, error = %e, "Row count failed, omitting total");
                None
            }
        };
        Ok(result)
    }

    async fn get_columns_for_table(&self, config: &PluginConfig, schema: &str, unit: &str) -> Result<Vec<Column>> {
        let intro = self.introspector();
        self.run(
            config,
            "get_columns_for_table",
            &table_details(schema, unit),
            move |mut conn| async move { intro.get_columns(&mut conn, schema, unit).await },
        )
        .await
    }

    async fn get_column_constraints(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
    ) -> Result<HashMap<String, ColumnConstraints>> {
        let intro = self.introspector();
        self.run(
            config,
            "get_column_constraints",
            &table_details(schema, unit),
            move |mut conn| async move { Ok(intro.get_constraints(&mut conn, schema, unit).await) },
        )
        .await
    }

    async fn get_foreign_key_relationships(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
    ) -> Result<HashMap<String, ForeignKeyRelationship>> {
        let intro = self.introspector();
        self.run(
            config,
            "get_foreign_key_relationships",
            &table_details(schema, unit),
            move |mut conn| async move { Ok(intro.get_foreign_keys(&mut conn, schema, unit).await) },
        )
        .await
    }

    async fn get_graph(&self, config: &PluginConfig, schema: &str) -> Result<Vec<GraphUnit>> {
        let intro = self.introspector();
        self.run(
            config,
            "get_graph",
            &[("schema", schema.to_string())],
            move |mut conn| async move { intro.get_graph(&mut conn, schema).await },
        )
        .await
    }

    async fn raw_execute(&self, config: &PluginConfig, query: &str) -> Result<GetRowsResult> {
        if query.trim().is_empty() {
            return Err(EngineError::validation("query cannot be empty"));
        }
        let returns_rows = is_row_returning(query);
        let result = self
            .run(config, "raw_execute", &[], move |mut conn| async move {
                if returns_rows {
                    conn.query(query, &[]).await.map(Ok)
                } else {
                    conn.execute(query, &[]).await.map(Err)
                }
            })
            .await?;
        Ok(match result {
            Ok(rows) => self.to_rows_result(rows),
            Err(affected) => GetRowsResult {
                columns: vec![Column::new("AffectedRows", "INTEGER")],
                rows: vec![vec![affected.to_string()]],
                total_count: Some(1),
                disable_update: true,
            },
        })
    }

    async fn export_data(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        writer: &mut dyn RowWriter,
        selected_rows: &[Vec<Record>],
    ) -> Result<()> {
        self.export_rows(config, schema, unit, writer, selected_rows).await
    }

    async fn import_data(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        reader: &mut dyn RowReader,
        options: &ImportOptions,
    ) -> Result<ImportResult> {
        self.import_rows(config, schema, unit, reader, options).await
    }

    async fn chat(
        &self,
        config: &PluginConfig,
        schema: &str,
        previous: &str,
        query: &str,
        provider: &dyn ChatProvider,
    ) -> Result<String> {
        let intro = self.introspector();
        let schema_text = self
            .run(
                config,
                "chat",
                &[("schema", schema.to_string())],
                move |mut conn| async move { intro.schema_text(&mut conn, schema).await },
            )
            .await?;
        provider.generate(&schema_text, previous, query).await
    }
}

/// Whether `type_name` is a text family column, for which empty cells stay empty strings
pub(crate) fn is_text_type(type_name: &str) -> bool {
    matches!(
        TypeSpec::parse(type_name).family(),
        super::types::TypeFamily::Text | super::types::TypeFamily::Xml | super::types::TypeFamily::Other
    )
}
