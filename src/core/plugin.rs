//! Plugin contract
//!
//! The uniform surface every backing store is reached through. SQL stores share
//! one generic implementation ([`SqlPlugin`](crate::core::engine::SqlPlugin))
//! parameterized over [`DialectFacts`](crate::core::dialect::DialectFacts);
//! non-SQL stores implement the trait directly.

use super::config::PluginConfig;
use super::database_types::DatabaseType;
use super::error::{EngineError, Result};
use super::model::{
    Column, ColumnConstraints, ForeignKeyRelationship, GetRowsResult, GraphUnit, ImportOptions,
    ImportResult, Record, SortCondition, StorageUnit, WhereCondition,
};
use super::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;

/// Paging and filtering for [`Plugin::get_rows`]
#[derive(Debug, Clone, Default)]
pub struct RowsRequest {
    pub condition: Option<WhereCondition>,
    pub sort: Vec<SortCondition>,
    pub page_size: u64,
    pub page_offset: u64,
}

impl RowsRequest {
    pub fn page(page_size: u64, page_offset: u64) -> Self {
        Self {
            page_size,
            page_offset,
            ..Default::default()
        }
    }

    pub fn with_condition(mut self, condition: WhereCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortCondition>) -> Self {
        self.sort = sort;
        self
    }
}

/// Sink for exported rows; the first row is the header
pub trait RowWriter: Send {
    fn write_row(&mut self, row: &[String]) -> Result<()>;
}

impl<F> RowWriter for F
where
    F: FnMut(&[String]) -> Result<()> + Send,
{
    fn write_row(&mut self, row: &[String]) -> Result<()> {
        self(row)
    }
}

/// Source of imported rows; the first row is the header, `None` ends the stream
pub trait RowReader: Send {
    fn read_row(&mut self) -> Result<Option<Vec<String>>>;
}

impl<F> RowReader for F
where
    F: FnMut() -> Result<Option<Vec<String>>> + Send,
{
    fn read_row(&mut self) -> Result<Option<Vec<String>>> {
        self()
    }
}

/// Natural-language query generation, supplied by the caller
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Turn `query` into a statement for a store described by `schema_text`
    async fn generate(&self, schema_text: &str, previous: &str, query: &str) -> Result<String>;
}

/// Uniform data-access contract
#[async_trait]
pub trait Plugin: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Liveness check; never errors
    async fn is_available(&self, config: &PluginConfig) -> bool;

    async fn get_databases(&self, config: &PluginConfig) -> Result<Vec<String>>;

    async fn get_all_schemas(&self, config: &PluginConfig) -> Result<Vec<String>>;

    async fn get_storage_units(&self, config: &PluginConfig, schema: &str) -> Result<Vec<StorageUnit>>;

    async fn storage_unit_exists(&self, config: &PluginConfig, schema: &str, unit: &str) -> Result<bool> {
        Ok(self
            .get_storage_units(config, schema)
            .await?
            .iter()
            .any(|u| u.name == unit))
    }

    /// Create a storage unit from `fields` (`key` = name, `value` = type)
    async fn add_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        fields: &[Record],
    ) -> Result<bool>;

    async fn add_row(&self, config: &PluginConfig, schema: &str, unit: &str, values: &[Record]) -> Result<bool>;

    /// Write `updated_columns` of one row identified by the rest of `values`
    async fn update_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        values: &[Record],
        updated_columns: &[String],
    ) -> Result<bool>;

    async fn delete_row(&self, config: &PluginConfig, schema: &str, unit: &str, values: &[Record]) -> Result<bool>;

    async fn clear_table_data(&self, config: &PluginConfig, schema: &str, unit: &str) -> Result<bool>;

    async fn bulk_add_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        rows: &[Vec<Record>],
    ) -> Result<bool>;

    async fn get_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        request: &RowsRequest,
    ) -> Result<GetRowsResult>;

    async fn get_columns_for_table(&self, config: &PluginConfig, schema: &str, unit: &str) -> Result<Vec<Column>>;

    async fn get_column_constraints(
        &self,
        _config: &PluginConfig,
        _schema: &str,
        _unit: &str,
    ) -> Result<HashMap<String, ColumnConstraints>> {
        Ok(HashMap::new())
    }

    async fn get_foreign_key_relationships(
        &self,
        _config: &PluginConfig,
        _schema: &str,
        _unit: &str,
    ) -> Result<HashMap<String, ForeignKeyRelationship>> {
        Ok(HashMap::new())
    }

    async fn get_graph(&self, config: &PluginConfig, schema: &str) -> Result<Vec<GraphUnit>>;

    async fn raw_execute(&self, config: &PluginConfig, query: &str) -> Result<GetRowsResult>;

    /// Stream a unit, or only `selected_rows` when given, into `writer`
    async fn export_data(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        writer: &mut dyn RowWriter,
        selected_rows: &[Vec<Record>],
    ) -> Result<()>;

    async fn import_data(
        &self,
        _config: &PluginConfig,
        _schema: &str,
        _unit: &str,
        _reader: &mut dyn RowReader,
        _options: &ImportOptions,
    ) -> Result<ImportResult> {
        Err(EngineError::unsupported(format!(
            "import is not supported for {}",
            self.database_type()
        )))
    }

    async fn chat(
        &self,
        _config: &PluginConfig,
        _schema: &str,
        _previous: &str,
        _query: &str,
        _provider: &dyn ChatProvider,
    ) -> Result<String> {
        Err(EngineError::unsupported(format!(
            "chat is not supported for {}",
            self.database_type()
        )))
    }

    /// Export-safe display form of a value
    fn format_value(&self, value: &Value) -> String {
        format_export_value(value)
    }
}

/// Display form with formula escaping, as written to exports
pub fn format_export_value(value: &Value) -> String {
    let text = match value {
        Value::DateTime(dt) if dt.time() == chrono::NaiveTime::MIN => dt.date().format("%Y-%m-%d").to_string(),
        other => other.to_display_string(),
    };
    escape_formula(&text)
}

/// Prefix spreadsheet formula triggers (`= + - @ \t \r`) with `'`
pub fn escape_formula(value: &str) -> String {
    match value.chars().next() {
        Some('=' | '+' | '-' | '@' | '\t' | '\r') => format!("'{}", value),
        _ => value.to_string(),
    }
}

/// `name:TYPE` export header cell
pub fn format_header(column: &str, type_name: &str) -> String {
    format!("{}:{}", column, type_name)
}

/// Split an import header cell into name and optional type
pub fn parse_header(cell: &str) -> (String, Option<String>) {
    match cell.rsplit_once(':') {
        Some((name, ty)) if !name.trim().is_empty() && !ty.trim().is_empty() => {
            (name.trim().to_string(), Some(ty.trim().to_string()))
        }
        _ => (cell.trim().to_string(), None),
    }
}
