//! ClickHouse dialect
//!
//! Catalog facts come from `system.tables` and `system.columns`. A schema is a
//! database; an empty schema means the connection's current database. Rows are
//! changed through `ALTER TABLE .. UPDATE/DELETE` mutations and there are no
//! transactions, so tolerant batches cannot isolate a row with a savepoint.

use crate::core::database_types::DatabaseType;
use crate::core::dialect::{ConstraintQuery, ConstraintSource, DialectFacts, BASE_OPERATORS};
use crate::core::error::{EngineError, Result};
use crate::core::model::ColumnDef;
use crate::core::query_builder::BuiltQuery;
use crate::core::value::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Parameters are interpolated client-side; this bounds one statement's size
pub const CLICKHOUSE_MAX_PARAMETERS: usize = 65535;

static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("TINYINT", "INT8"),
        ("SMALLINT", "INT16"),
        ("INT", "INT32"),
        ("INTEGER", "INT32"),
        ("BIGINT", "INT64"),
        ("FLOAT", "FLOAT32"),
        ("DOUBLE", "FLOAT64"),
        ("BOOLEAN", "BOOL"),
        ("TEXT", "STRING"),
        ("VARCHAR", "STRING"),
        ("CHAR", "FIXEDSTRING"),
        ("TIMESTAMP", "DATETIME"),
    ]
    .into_iter()
    .collect()
});

static OPERATORS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut ops = BASE_OPERATORS.clone();
    ops.insert("==", "==");
    ops.insert("ILIKE", "ILIKE");
    ops.insert("GLOBAL IN", "GLOBAL IN");
    ops.insert("GLOBAL NOT IN", "GLOBAL NOT IN");
    ops
});

const SUPPORTED_TYPES: &[&str] = &[
    "INT8", "INT16", "INT32", "INT64", "INT128", "INT256", "UINT8", "UINT16", "UINT32", "UINT64",
    "UINT128", "UINT256", "FLOAT32", "FLOAT64", "DECIMAL", "DECIMAL32", "DECIMAL64", "DECIMAL128",
    "STRING", "FIXEDSTRING", "DATE", "DATE32", "DATETIME", "DATETIME64", "BOOL", "UUID", "JSON",
    "IPV4", "IPV6", "ENUM8", "ENUM16",
];

const SCHEMA_FILTER: &str = "COALESCE(NULLIF(?, ''), currentDatabase())";

/// ClickHouse dialect facts
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickHouseDialect;

impl ClickHouseDialect {
    pub fn new() -> Self {
        Self
    }
}

fn schema_and_table(schema: &str, table: &str) -> Vec<Value> {
    vec![Value::from(schema), Value::from(table)]
}

impl DialectFacts for ClickHouseDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::ClickHouse
    }

    fn identifier_quote(&self) -> char {
        '`'
    }

    fn max_parameters(&self) -> usize {
        CLICKHOUSE_MAX_PARAMETERS
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

    fn databases_query(&self) -> Option<BuiltQuery> {
        Some(BuiltQuery::new("SELECT name FROM system.databases ORDER BY name"))
    }

    /// Materialized-view backing tables (`.inner*`) are hidden
    fn table_info_query(&self, schema: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT name, engine AS `Type`, \
                 ifNull(formatReadableSize(total_bytes), 'unknown') AS `Total Size`, \
                 ifNull(total_rows, 0) AS `Count` \
                 FROM system.tables WHERE database = {SCHEMA_FILTER} \
                 AND name NOT LIKE '.inner%' ORDER BY name"
            ),
            vec![Value::from(schema)],
        )
    }

    fn schema_columns_query(&self, schema: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT table, name, type FROM system.columns \
                 WHERE database = {SCHEMA_FILTER} ORDER BY table, position"
            ),
            vec![Value::from(schema)],
        )
    }

    fn column_types_query(&self, schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT name, type, character_octet_length, numeric_precision, numeric_scale \
                 FROM system.columns WHERE database = {SCHEMA_FILTER} AND table = ? \
                 ORDER BY position"
            ),
            schema_and_table(schema, table),
        )
    }

    fn primary_key_query(&self, schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT name FROM system.columns \
                 WHERE database = {SCHEMA_FILTER} AND table = ? AND is_in_primary_key = 1 \
                 ORDER BY position"
            ),
            schema_and_table(schema, table),
        )
    }

    /// There are no declared foreign keys; the query is shaped but empty
    fn foreign_key_query(&self, schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT name, '' AS referenced_table, '' AS referenced_column \
                 FROM system.columns WHERE database = {SCHEMA_FILTER} AND table = ? AND 1 = 0"
            ),
            schema_and_table(schema, table),
        )
    }

    /// Relations inferred by name: `orders.user_id` points at `user.id`
    fn graph_query(&self, schema: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT DISTINCT pk.table AS table1, fk.table AS table2, 'OneToMany' AS relation \
                 FROM system.columns AS fk \
                 INNER JOIN system.columns AS pk \
                   ON fk.database = pk.database AND fk.name = concat(pk.table, '_id') \
                 WHERE fk.database = {SCHEMA_FILTER} AND pk.name = 'id' AND fk.table != pk.table \
                 ORDER BY table1, table2"
            ),
            vec![Value::from(schema)],
        )
    }

    fn constraint_queries(&self, schema: &str, table: &str) -> Vec<ConstraintQuery> {
        vec![
            ConstraintQuery::new(
                ConstraintSource::Nullability,
                BuiltQuery::with_params(
                    format!(
                        "SELECT name, if(type LIKE '%Nullable(%', 'YES', 'NO') FROM system.columns \
                         WHERE database = {SCHEMA_FILTER} AND table = ?"
                    ),
                    schema_and_table(schema, table),
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::ColumnDetails,
                BuiltQuery::with_params(
                    format!(
                        "SELECT name, nullIf(default_expression, ''), 0, nullIf(comment, '') \
                         FROM system.columns WHERE database = {SCHEMA_FILTER} AND table = ?"
                    ),
                    schema_and_table(schema, table),
                ),
            ),
        ]
    }

    /// MergeTree ordered by the primary key, or the first column without one.
    /// Columns are non-nullable unless declared otherwise.
    fn create_table_query(&self, schema: &str, table: &str, columns: &[ColumnDef]) -> Result<String> {
        let Some(first) = columns.first() else {
            return Err(EngineError::validation("no fields provided for table creation"));
        };
        let defs = columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", self.quote_identifier(&c.name)?, c.type_name.trim());
                if c.nullable && !c.primary {
                    def.push_str(" NULL");
                }
                Ok(def)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut order_by = columns
            .iter()
            .filter(|c| c.primary)
            .map(|c| self.quote_identifier(&c.name))
            .collect::<Result<Vec<_>>>()?;
        if order_by.is_empty() {
            order_by.push(self.quote_identifier(&first.name)?);
        }
        Ok(format!(
            "CREATE TABLE {} ({}) ENGINE = MergeTree() ORDER BY ({})",
            self.build_full_table_name(schema, table)?,
            defs.join(", "),
            order_by.join(", ")
        ))
    }

    fn orders_rows_by_primary_key(&self) -> bool {
        true
    }

    fn supports_savepoints(&self) -> bool {
        false
    }

    fn update_prefix(&self, full_table_name: &str) -> String {
        format!("ALTER TABLE {} UPDATE", full_table_name)
    }

    fn delete_prefix(&self, full_table_name: &str) -> String {
        format!("ALTER TABLE {} DELETE", full_table_name)
    }

    fn clear_table_query(&self, full_table_name: &str) -> String {
        format!("TRUNCATE TABLE {}", full_table_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::convert::TypeConverter;
    use crate::core::query_builder::QueryBuilder;
    use crate::core::types::TypeFamily;
    use std::sync::Arc;

    fn converter() -> TypeConverter {
        TypeConverter::new(Arc::new(ClickHouseDialect::new()))
    }

    #[test]
    fn test_names_and_aliases() {
        let d = ClickHouseDialect::new();
        assert_eq!(d.build_full_table_name("analytics", "events").unwrap(), "`analytics`.`events`");
        assert_eq!(d.normalize_type("varchar"), "STRING");
        assert_eq!(d.normalize_type("Int"), "INT32");
        assert!(d.is_supported_column_type("UInt64"));
        assert!(d.is_supported_column_type("text"));
        assert_eq!(d.resolve_operator("global not in").unwrap(), "GLOBAL NOT IN");
        assert!(d.all_schemas_query().is_none());
        assert!(!d.supports_savepoints());
        assert!(!d.database_type().supports_transactions());
    }

    #[test]
    fn test_catalog_queries_bind_schema() {
        let d = ClickHouseDialect::new();
        let q = d.table_info_query("analytics");
        assert!(q.sql.contains("FROM system.tables"));
        assert!(q.sql.contains("NOT LIKE '.inner%'"));
        assert_eq!(q.params, vec![Value::from("analytics")]);

        let q = d.column_types_query("", "events");
        assert!(q.sql.contains("currentDatabase()"));
        assert_eq!(q.params, vec![Value::from(""), Value::from("events")]);
        assert!(d.primary_key_query("a", "b").sql.contains("is_in_primary_key = 1"));
    }

    #[test]
    fn test_wrapped_types_convert() {
        let c = converter();
        assert_eq!(
            c.convert_from_string("7", "LowCardinality(Nullable(UInt32))").unwrap(),
            Value::UInt(7)
        );
        assert!(c
            .convert_from_string("", "Nullable(Int64)")
            .unwrap()
            .is_null());
        assert_eq!(
            c.convert_from_string("abc", "FixedString(3)").unwrap(),
            Value::Text("abc".into())
        );
        assert_eq!(TypeFamily::of("DATETIME64"), TypeFamily::DateTime);
    }

    #[test]
    fn test_mutations_replace_update_and_delete() {
        let c = converter();
        let b = QueryBuilder::new(&c);
        let table = b.dialect().build_full_table_name("db", "t").unwrap();

        let q = b
            .update_query(&table, &[("name".into(), Value::from("x"))], &[("id".into(), Value::Int(1))])
            .unwrap();
        assert_eq!(q.sql, "ALTER TABLE `db`.`t` UPDATE `name` = ? WHERE `id` = ?");

        let q = b.delete_query(&table, &[("id".into(), Value::Int(1))]).unwrap();
        assert_eq!(q.sql, "ALTER TABLE `db`.`t` DELETE WHERE `id` = ?");
        assert_eq!(b.dialect().clear_table_query(&table), "TRUNCATE TABLE `db`.`t`");
    }

    #[test]
    fn test_create_table_orders_by_key() {
        let d = ClickHouseDialect::new();
        let cols = [
            ColumnDef {
                name: "id".into(),
                type_name: "UInt64".into(),
                primary: true,
                nullable: false,
            },
            ColumnDef {
                name: "note".into(),
                type_name: "String".into(),
                primary: false,
                nullable: true,
            },
        ];
        assert_eq!(
            d.create_table_query("db", "t", &cols).unwrap(),
            "CREATE TABLE `db`.`t` (`id` UInt64, `note` String NULL) ENGINE = MergeTree() ORDER BY (`id`)"
        );

        let keyless = &cols[1..];
        assert!(d
            .create_table_query("", "t", keyless)
            .unwrap()
            .ends_with("ORDER BY (`note`)"));
        assert!(d.create_table_query("", "t", &[]).is_err());
    }
}
