//! Dialect facts
//!
//! The narrow per-store contract: identifier quoting, placeholder syntax, type
//! aliases, catalog queries and DDL text. The generic engine
//! ([`SqlPlugin`](crate::core::engine::SqlPlugin)) is written once against this
//! trait and every SQL backend implements it.

use super::database_types::DatabaseType;
use super::error::{EngineError, Result};
use super::model::ColumnDef;
use super::query_builder::BuiltQuery;
use super::types::{normalize_with_alias_map, TypeFamily, TypeSpec};
use super::value::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// How `IN` lists reach the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayBinding {
    /// One placeholder per element: `col IN (?, ?, ?)`
    Expand,
    /// One array parameter: `col = ANY($1)`
    Native,
}

/// What the rows of a constraint query carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintSource {
    /// `(column, is_nullable)` with `YES`/`NO` or `1`/`0`
    Nullability,
    /// `(column)` for every single-column unique index
    Unique,
    /// CHECK clause text in the last column
    CheckClause,
    /// `CREATE TABLE` text from which CHECK clauses are extracted
    TableDefinition,
    /// `(column, default, auto_increment, comment)`
    ColumnDetails,
}

/// A catalog query feeding [`ColumnConstraints`](crate::core::model::ColumnConstraints)
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintQuery {
    pub source: ConstraintSource,
    pub query: BuiltQuery,
}

impl ConstraintQuery {
    pub fn new(source: ConstraintSource, query: BuiltQuery) -> Self {
        Self { source, query }
    }
}

/// Comparison operators every SQL dialect accepts
pub static BASE_OPERATORS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("=", "="),
        (">=", ">="),
        (">", ">"),
        ("<=", "<="),
        ("<", "<"),
        ("<>", "<>"),
        ("!=", "!="),
        ("BETWEEN", "BETWEEN"),
        ("NOT BETWEEN", "NOT BETWEEN"),
        ("LIKE", "LIKE"),
        ("NOT LIKE", "NOT LIKE"),
        ("IN", "IN"),
        ("NOT IN", "NOT IN"),
        ("IS NULL", "IS NULL"),
        ("IS NOT NULL", "IS NOT NULL"),
    ]
    .into_iter()
    .collect()
});

/// Quote `ident` with `quote`, doubling any embedded quote character
pub fn quote_with(quote: char, ident: &str) -> Result<String> {
    if ident.trim().is_empty() {
        return Err(EngineError::validation("identifier cannot be empty"));
    }
    if ident.contains('\0') {
        return Err(EngineError::validation("identifier cannot contain NUL"));
    }
    let doubled: String = [quote, quote].iter().collect();
    let escaped = ident.replace(quote, &doubled);
    Ok(format!("{quote}{escaped}{quote}"))
}

/// Per-store facts the generic engine is parameterized over
pub trait DialectFacts: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Identifier quote character
    fn identifier_quote(&self) -> char {
        '"'
    }

    /// Quote one identifier; empty identifiers are rejected
    fn quote_identifier(&self, ident: &str) -> Result<String> {
        quote_with(self.identifier_quote(), ident)
    }

    /// Placeholder for the 1-based parameter `index`
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Bound-parameter ceiling for one statement
    fn max_parameters(&self) -> usize;

    /// Accepted operator spelling to SQL operator
    fn operators(&self) -> &HashMap<&'static str, &'static str> {
        &BASE_OPERATORS
    }

    /// Resolve a caller-supplied operator, case-insensitively
    fn resolve_operator(&self, op: &str) -> Result<&'static str> {
        let ops = self.operators();
        ops.get(op)
            .or_else(|| {
                let normalized = op.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
                ops.get(normalized.as_str())
            })
            .copied()
            .ok_or_else(|| EngineError::validation(format!("invalid SQL operator: {}", op)))
    }

    fn array_binding(&self) -> ArrayBinding {
        ArrayBinding::Expand
    }

    /// Canonical base types accepted by `add_storage_unit`
    fn supported_column_types(&self) -> &[&'static str];

    /// Uppercase alias to canonical type
    fn alias_map(&self) -> &HashMap<&'static str, &'static str>;

    /// Collapse aliases, keep parameters
    fn normalize_type(&self, type_name: &str) -> String {
        normalize_with_alias_map(type_name, self.alias_map())
    }

    /// Whether `type_name` may be used in a column definition
    fn is_supported_column_type(&self, type_name: &str) -> bool {
        let normalized = TypeSpec::parse(&self.normalize_type(type_name)).base_type;
        let raw = TypeSpec::parse(type_name).base_type;
        let supported = self.supported_column_types();
        supported.contains(&normalized.as_str()) || supported.contains(&raw.as_str())
    }

    fn default_port(&self) -> Option<u16> {
        self.database_type().default_port()
    }

    /// `false` for stores without schemas (the schema argument is ignored)
    fn uses_schema(&self) -> bool {
        true
    }

    /// Quoted `schema.table`, or just the table when there is no schema
    fn build_full_table_name(&self, schema: &str, table: &str) -> Result<String> {
        let table = self.quote_identifier(table)?;
        if schema.is_empty() || !self.uses_schema() {
            return Ok(table);
        }
        Ok(format!("{}.{}", self.quote_identifier(schema)?, table))
    }

    /// Rows of `(schema_name)`
    fn all_schemas_query(&self) -> Option<BuiltQuery> {
        None
    }

    /// Rows of `(database_name)`
    fn databases_query(&self) -> Option<BuiltQuery> {
        None
    }

    /// Rows of `(table_name, attributes...)`; attribute keys are the column names
    fn table_info_query(&self, schema: &str) -> BuiltQuery;

    /// Whether `table_info_query` lacks a row count, so one is queried per table
    fn storage_unit_needs_count(&self) -> bool {
        false
    }

    /// Rows of `(table_name, column_name, data_type)` for every table in `schema`
    fn schema_columns_query(&self, schema: &str) -> BuiltQuery;

    /// Rows of `(column_name, data_type, length, precision, scale)` in ordinal order
    fn column_types_query(&self, schema: &str, table: &str) -> BuiltQuery;

    /// Rows of `(column_name)` in key order
    fn primary_key_query(&self, schema: &str, table: &str) -> BuiltQuery;

    /// Rows of `(column_name, referenced_table, referenced_column)`
    fn foreign_key_query(&self, schema: &str, table: &str) -> BuiltQuery;

    /// Rows of `(table1, table2, relation)`
    fn graph_query(&self, schema: &str) -> BuiltQuery;

    fn constraint_queries(&self, schema: &str, table: &str) -> Vec<ConstraintQuery>;

    /// Whether unsorted row pages are ordered by the primary key
    fn orders_rows_by_primary_key(&self) -> bool {
        false
    }

    /// Default ORDER BY body for unsorted row pages
    fn rows_order_by(&self, primary_keys: &[String]) -> Result<Option<String>> {
        if !self.orders_rows_by_primary_key() || primary_keys.is_empty() {
            return Ok(None);
        }
        let quoted = primary_keys
            .iter()
            .map(|k| self.quote_identifier(k))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(quoted.join(", ")))
    }

    /// Conversion hook run before the generic rules; `None` defers to them
    fn handle_custom_data_type(
        &self,
        _value: &str,
        _base_type: &str,
        _nullable: bool,
    ) -> Option<Result<Value>> {
        None
    }

    fn is_geometry_type(&self, type_name: &str) -> bool {
        TypeSpec::parse(type_name).family() == TypeFamily::Geometry
    }

    /// Render a raw geometry payload; `None` falls back to hex
    fn format_geometry(&self, _raw: &[u8], _type_name: &str) -> Option<String> {
        None
    }

    /// Whether row selects need per-column expressions instead of `*`
    fn needs_column_projection(&self) -> bool {
        false
    }

    /// Select-list expression for one column
    fn select_column_expression(&self, column: &str, _type_name: &str) -> Result<String> {
        self.quote_identifier(column)
    }

    /// `CREATE TABLE` text for `columns`
    fn create_table_query(&self, schema: &str, table: &str, columns: &[ColumnDef]) -> Result<String> {
        default_create_table(self, schema, table, columns, "")
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn supports_bulk_insert(&self) -> bool {
        true
    }

    /// `SAVEPOINT`/`ROLLBACK TO SAVEPOINT` inside a transaction
    fn supports_savepoints(&self) -> bool {
        true
    }

    /// Head of an `UPDATE`, up to and including `SET`
    fn update_prefix(&self, full_table_name: &str) -> String {
        format!("UPDATE {} SET", full_table_name)
    }

    /// Head of a `DELETE`, up to but excluding `WHERE`
    fn delete_prefix(&self, full_table_name: &str) -> String {
        format!("DELETE FROM {}", full_table_name)
    }

    /// Statement that removes every row of `full_table_name`
    fn clear_table_query(&self, full_table_name: &str) -> String {
        format!("DELETE FROM {}", full_table_name)
    }
}

/// Shared `CREATE TABLE` renderer. A single primary key is declared inline,
/// composite keys as a table constraint.
pub fn default_create_table<D: DialectFacts + ?Sized>(
    dialect: &D,
    schema: &str,
    table: &str,
    columns: &[ColumnDef],
    suffix: &str,
) -> Result<String> {
    if columns.is_empty() {
        return Err(EngineError::validation("no fields provided for table creation"));
    }
    let primary: Vec<&ColumnDef> = columns.iter().filter(|c| c.primary).collect();
    let inline_pk = primary.len() == 1;

    let mut defs = Vec::with_capacity(columns.len() + 1);
    for col in columns {
        let mut def = format!(
            "{} {}",
            dialect.quote_identifier(&col.name)?,
            col.type_name.trim()
        );
        if col.primary && inline_pk {
            def.push_str(" PRIMARY KEY");
        } else if !col.nullable {
            def.push_str(" NOT NULL");
        }
        defs.push(def);
    }
    if primary.len() > 1 {
        let keys = primary
            .iter()
            .map(|c| dialect.quote_identifier(&c.name))
            .collect::<Result<Vec<_>>>()?;
        defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    let mut sql = format!(
        "CREATE TABLE {} ({})",
        dialect.build_full_table_name(schema, table)?,
        defs.join(", ")
    );
    if !suffix.is_empty() {
        sql.push(' ');
        sql.push_str(suffix);
    }
    Ok(sql)
}
