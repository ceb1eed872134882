//! SQLite dialect
//!
//! Catalog queries read `sqlite_master` and the `pragma_*` table functions.
//! SQLite has no schemas, so every schema argument is ignored.

use crate::core::database_types::DatabaseType;
use crate::core::dialect::{ConstraintQuery, ConstraintSource, DialectFacts, BASE_OPERATORS};
use crate::core::error::Result;
use crate::core::query_builder::BuiltQuery;
use crate::core::types::TypeSpec;
use crate::core::value::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Bound-parameter ceiling of the default SQLite build
pub const SQLITE_MAX_PARAMETERS: usize = 999;

static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("INT", "INTEGER"),
        ("TINYINT", "INTEGER"),
        ("SMALLINT", "INTEGER"),
        ("MEDIUMINT", "INTEGER"),
        ("BIGINT", "INTEGER"),
        ("INT2", "INTEGER"),
        ("INT8", "INTEGER"),
        ("DOUBLE", "REAL"),
        ("DOUBLE PRECISION", "REAL"),
        ("FLOAT", "REAL"),
        ("CHARACTER", "TEXT"),
        ("VARCHAR", "TEXT"),
        ("VARYING CHARACTER", "TEXT"),
        ("NCHAR", "TEXT"),
        ("NATIVE CHARACTER", "TEXT"),
        ("NVARCHAR", "TEXT"),
        ("CLOB", "TEXT"),
        ("CHAR", "TEXT"),
        ("DECIMAL", "NUMERIC"),
        ("BOOL", "BOOLEAN"),
        ("TIMESTAMP", "DATETIME"),
    ]
    .into_iter()
    .collect()
});

static OPERATORS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut ops = BASE_OPERATORS.clone();
    ops.insert("GLOB", "GLOB");
    ops
});

const SUPPORTED_TYPES: &[&str] = &[
    "NULL", "INTEGER", "REAL", "TEXT", "BLOB", "NUMERIC", "BOOLEAN", "DATE", "DATETIME",
];

fn is_temporal(base_type: &str) -> bool {
    matches!(base_type, "DATE" | "DATETIME" | "TIMESTAMP")
}

/// SQLite dialect facts
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    pub fn new() -> Self {
        Self
    }
}

impl DialectFacts for SqliteDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn max_parameters(&self) -> usize {
        SQLITE_MAX_PARAMETERS
    }

    fn operators(&self) -> &HashMap<&'static str, &'static str> {
        &OPERATORS
    }

    fn supported_column_types(&self) -> &[&'static str] {
        SUPPORTED_TYPES
    }

    fn alias_map(&self) -> &HashMap<&'static str, &'static str> {
        &ALIASES
    }

    fn uses_schema(&self) -> bool {
        false
    }

    fn table_info_query(&self, _schema: &str) -> BuiltQuery {
        BuiltQuery::new(
            "SELECT name AS table_name, type AS \"Type\" FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
    }

    fn storage_unit_needs_count(&self) -> bool {
        true
    }

    fn schema_columns_query(&self, _schema: &str) -> BuiltQuery {
        BuiltQuery::new(
            "SELECT m.name AS table_name, p.name AS column_name, p.type AS data_type \
             FROM sqlite_master m, pragma_table_info(m.name) p \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%' \
             ORDER BY m.name, p.cid",
        )
    }

    fn column_types_query(&self, _schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            "SELECT name, type, NULL, NULL, NULL FROM pragma_table_info(?) ORDER BY cid",
            vec![Value::from(table)],
        )
    }

    fn primary_key_query(&self, _schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
            vec![Value::from(table)],
        )
    }

    fn foreign_key_query(&self, _schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?)",
            vec![Value::from(table)],
        )
    }

    fn graph_query(&self, _schema: &str) -> BuiltQuery {
        BuiltQuery::new(
            "SELECT DISTINCT f.\"table\" AS table1, m.name AS table2, 'OneToMany' AS relation \
             FROM sqlite_master m, pragma_foreign_key_list(m.name) f \
             WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'",
        )
    }

    fn constraint_queries(&self, _schema: &str, table: &str) -> Vec<ConstraintQuery> {
        let table = || Value::from(table);
        vec![
            ConstraintQuery::new(
                ConstraintSource::Nullability,
                BuiltQuery::with_params(
                    "SELECT name, CASE WHEN \"notnull\" = 1 OR pk > 0 THEN 'NO' ELSE 'YES' END \
                     FROM pragma_table_info(?)",
                    vec![table()],
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::Unique,
                BuiltQuery::with_params(
                    "SELECT ii.name FROM pragma_index_list(?) il, pragma_index_info(il.name) ii \
                     WHERE il.\"unique\" = 1 \
                     AND (SELECT COUNT(*) FROM pragma_index_info(il.name)) = 1 \
                     UNION \
                     SELECT name FROM pragma_table_info(?) WHERE pk = 1 \
                     AND (SELECT COUNT(*) FROM pragma_table_info(?) WHERE pk > 0) = 1",
                    vec![table(), table(), table()],
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::TableDefinition,
                BuiltQuery::with_params(
                    "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                    vec![table()],
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::ColumnDetails,
                BuiltQuery::with_params(
                    "SELECT name, dflt_value, \
                     CASE WHEN pk = 1 AND UPPER(type) = 'INTEGER' THEN 1 ELSE 0 END, NULL \
                     FROM pragma_table_info(?)",
                    vec![table()],
                ),
            ),
        ]
    }

    /// Date and time columns are stored as text; keep the caller's spelling so
    /// comparisons match what is on disk.
    fn handle_custom_data_type(
        &self,
        value: &str,
        base_type: &str,
        nullable: bool,
    ) -> Option<Result<Value>> {
        let base = TypeSpec::parse(base_type).base_type;
        if !is_temporal(&base) {
            return None;
        }
        if nullable && value.is_empty() {
            return None;
        }
        Some(Ok(Value::Text(value.to_string())))
    }

    fn needs_column_projection(&self) -> bool {
        true
    }

    /// Non-strict tables may hold numbers in DATETIME columns; read them as text
    fn select_column_expression(&self, column: &str, type_name: &str) -> Result<String> {
        let quoted = self.quote_identifier(column)?;
        let base = TypeSpec::parse(&self.normalize_type(type_name)).base_type;
        if is_temporal(&base) {
            Ok(format!("CAST({quoted} AS TEXT) AS {quoted}"))
        } else {
            Ok(quoted)
        }
    }
}
