//! MySQL and MariaDB dialect
//!
//! Both speak the same wire protocol and expose the same `information_schema`
//! layout; only the reported [`DatabaseType`] differs. A schema is a database
//! here, and an empty schema means the connection's current database.

use crate::core::database_types::DatabaseType;
use crate::core::dialect::{
    default_create_table, ConstraintQuery, ConstraintSource, DialectFacts, BASE_OPERATORS,
};
use crate::core::error::{EngineError, Result};
use crate::core::model::ColumnDef;
use crate::core::query_builder::BuiltQuery;
use crate::core::types::{TypeFamily, TypeSpec};
use crate::core::value::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Bound-parameter ceiling of a prepared statement
pub const MYSQL_MAX_PARAMETERS: usize = 65535;

static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("INTEGER", "INT"),
        ("BOOL", "BOOLEAN"),
        ("DEC", "DECIMAL"),
        ("FIXED", "DECIMAL"),
        ("NUMERIC", "DECIMAL"),
        ("DOUBLE PRECISION", "DOUBLE"),
        ("REAL", "DOUBLE"),
        ("CHARACTER", "CHAR"),
        ("CHARACTER VARYING", "VARCHAR"),
    ]
    .into_iter()
    .collect()
});

static OPERATORS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut ops = BASE_OPERATORS.clone();
    ops.insert("REGEXP", "REGEXP");
    ops.insert("NOT REGEXP", "NOT REGEXP");
    ops
});

const SUPPORTED_TYPES: &[&str] = &[
    "TINYINT", "SMALLINT", "MEDIUMINT", "INT", "BIGINT", "DECIMAL", "FLOAT", "DOUBLE", "VARCHAR",
    "CHAR", "TINYTEXT", "TEXT", "MEDIUMTEXT", "LONGTEXT", "BINARY", "VARBINARY", "TINYBLOB", "BLOB",
    "MEDIUMBLOB", "LONGBLOB", "DATE", "TIME", "DATETIME", "TIMESTAMP", "YEAR", "BOOLEAN", "JSON",
    "ENUM", "SET",
];

/// Current database when the caller passes no schema
const SCHEMA_FILTER: &str = "COALESCE(NULLIF(?, ''), DATABASE())";

/// MySQL/MariaDB dialect facts
#[derive(Debug, Clone, Copy)]
pub struct MysqlDialect {
    database_type: DatabaseType,
}

impl MysqlDialect {
    pub fn new() -> Self {
        Self {
            database_type: DatabaseType::Mysql,
        }
    }

    pub fn mariadb() -> Self {
        Self {
            database_type: DatabaseType::MariaDb,
        }
    }
}

impl Default for MysqlDialect {
    fn default() -> Self {
        Self::new()
    }
}

fn schema_and_table(schema: &str, table: &str) -> Vec<Value> {
    vec![Value::from(schema), Value::from(table)]
}

/// `BOOLEAN` is stored as `TINYINT(1)`
fn is_boolean_column(type_name: &str) -> bool {
    let spec = TypeSpec::parse(type_name);
    spec.base_type == "BOOLEAN" || (spec.base_type == "TINYINT" && spec.length == Some(1))
}

impl DialectFacts for MysqlDialect {
    fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    fn identifier_quote(&self) -> char {
        '`'
    }

    fn max_parameters(&self) -> usize {
        MYSQL_MAX_PARAMETERS
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

    fn all_schemas_query(&self) -> Option<BuiltQuery> {
        Some(BuiltQuery::new(
            "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA ORDER BY SCHEMA_NAME",
        ))
    }

    fn databases_query(&self) -> Option<BuiltQuery> {
        self.all_schemas_query()
    }

    fn table_info_query(&self, schema: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT TABLE_NAME, TABLE_TYPE AS `Type`, \
                 CONCAT(ROUND(IFNULL((DATA_LENGTH + INDEX_LENGTH) / 1024 / 1024, 0), 2), ' MB') AS `Total Size`, \
                 CONCAT(ROUND(IFNULL(DATA_LENGTH / 1024 / 1024, 0), 2), ' MB') AS `Data Size`, \
                 IFNULL(TABLE_ROWS, 0) AS `Count`, \
                 IFNULL(ENGINE, '') AS `Engine` \
                 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = {SCHEMA_FILTER} \
                 ORDER BY TABLE_NAME"
            ),
            vec![Value::from(schema)],
        )
    }

    fn schema_columns_query(&self, schema: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = {SCHEMA_FILTER} ORDER BY TABLE_NAME, ORDINAL_POSITION"
            ),
            vec![Value::from(schema)],
        )
    }

    fn column_types_query(&self, schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT COLUMN_NAME, \
                 CASE WHEN COLUMN_TYPE LIKE '%unsigned%' THEN CONCAT(DATA_TYPE, ' unsigned') \
                 WHEN COLUMN_TYPE = 'tinyint(1)' THEN 'tinyint(1)' ELSE DATA_TYPE END, \
                 CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE \
                 FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_SCHEMA = {SCHEMA_FILTER} AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION"
            ),
            schema_and_table(schema, table),
        )
    }

    fn primary_key_query(&self, schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT k.COLUMN_NAME FROM information_schema.TABLE_CONSTRAINTS t \
                 JOIN information_schema.KEY_COLUMN_USAGE k \
                   ON k.CONSTRAINT_NAME = t.CONSTRAINT_NAME \
                   AND k.TABLE_SCHEMA = t.TABLE_SCHEMA AND k.TABLE_NAME = t.TABLE_NAME \
                 WHERE t.CONSTRAINT_TYPE = 'PRIMARY KEY' \
                   AND t.TABLE_SCHEMA = {SCHEMA_FILTER} AND t.TABLE_NAME = ? \
                 ORDER BY k.ORDINAL_POSITION"
            ),
            schema_and_table(schema, table),
        )
    }

    fn foreign_key_query(&self, schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME \
                 FROM information_schema.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = {SCHEMA_FILTER} AND TABLE_NAME = ? \
                   AND REFERENCED_TABLE_NAME IS NOT NULL"
            ),
            schema_and_table(schema, table),
        )
    }

    fn graph_query(&self, schema: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            format!(
                "SELECT DISTINCT rc.REFERENCED_TABLE_NAME AS table1, rc.TABLE_NAME AS table2, \
                 'OneToMany' AS relation \
                 FROM INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
                 JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                   ON rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
                   AND rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA \
                 WHERE rc.CONSTRAINT_SCHEMA = {SCHEMA_FILTER}"
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
                        "SELECT COLUMN_NAME, IS_NULLABLE FROM information_schema.COLUMNS \
                         WHERE TABLE_SCHEMA = {SCHEMA_FILTER} AND TABLE_NAME = ?"
                    ),
                    schema_and_table(schema, table),
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::Unique,
                BuiltQuery::with_params(
                    format!(
                        "SELECT s.COLUMN_NAME FROM information_schema.STATISTICS s \
                         WHERE s.TABLE_SCHEMA = {SCHEMA_FILTER} AND s.TABLE_NAME = ? AND s.NON_UNIQUE = 0 \
                         AND (SELECT COUNT(*) FROM information_schema.STATISTICS s2 \
                              WHERE s2.TABLE_SCHEMA = s.TABLE_SCHEMA AND s2.TABLE_NAME = s.TABLE_NAME \
                              AND s2.INDEX_NAME = s.INDEX_NAME) = 1"
                    ),
                    schema_and_table(schema, table),
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::CheckClause,
                BuiltQuery::with_params(
                    format!(
                        "SELECT cc.CONSTRAINT_NAME, cc.CHECK_CLAUSE \
                         FROM information_schema.CHECK_CONSTRAINTS cc \
                         JOIN information_schema.TABLE_CONSTRAINTS tc \
                           ON cc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA \
                           AND cc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
                         WHERE cc.CONSTRAINT_SCHEMA = {SCHEMA_FILTER} AND tc.TABLE_NAME = ?"
                    ),
                    schema_and_table(schema, table),
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::ColumnDetails,
                BuiltQuery::with_params(
                    format!(
                        "SELECT COLUMN_NAME, COLUMN_DEFAULT, \
                         CASE WHEN EXTRA LIKE '%auto_increment%' THEN 1 ELSE 0 END, \
                         NULLIF(COLUMN_COMMENT, '') \
                         FROM information_schema.COLUMNS \
                         WHERE TABLE_SCHEMA = {SCHEMA_FILTER} AND TABLE_NAME = ?"
                    ),
                    schema_and_table(schema, table),
                ),
            ),
        ]
    }

    /// Booleans travel as `0`/`1`
    fn handle_custom_data_type(
        &self,
        value: &str,
        base_type: &str,
        nullable: bool,
    ) -> Option<Result<Value>> {
        if !is_boolean_column(base_type) || (nullable && value.is_empty()) {
            return None;
        }
        let parsed = match value.trim().to_lowercase().as_str() {
            "1" | "true" | "t" | "yes" => Ok(Value::Bool(true)),
            "0" | "false" | "f" | "no" => Ok(Value::Bool(false)),
            _ => Err(EngineError::conversion(value, base_type, "not a boolean")),
        };
        Some(parsed)
    }

    /// Integer primary keys auto-increment
    fn create_table_query(&self, schema: &str, table: &str, columns: &[ColumnDef]) -> Result<String> {
        let sql = default_create_table(self, schema, table, columns, "")?;
        let primary: Vec<&ColumnDef> = columns.iter().filter(|c| c.primary).collect();
        let [pk] = primary.as_slice() else {
            return Ok(sql);
        };
        let family = TypeSpec::parse(&self.normalize_type(&pk.type_name)).family();
        if !matches!(family, TypeFamily::Integer | TypeFamily::Unsigned) {
            return Ok(sql);
        }
        let inline = format!(
            "{} {} PRIMARY KEY",
            self.quote_identifier(&pk.name)?,
            pk.type_name.trim()
        );
        Ok(sql.replacen(&inline, &format!("{inline} AUTO_INCREMENT"), 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backtick_quoting() {
        let d = MysqlDialect::new();
        assert_eq!(d.build_full_table_name("shop", "orders").unwrap(), "`shop`.`orders`");
        assert_eq!(d.quote_identifier("we`ird").unwrap(), "`we``ird`");
        assert_eq!(MysqlDialect::mariadb().database_type(), DatabaseType::MariaDb);
    }

    #[test]
    fn test_aliases_and_operators() {
        let d = MysqlDialect::new();
        assert_eq!(d.normalize_type("integer"), "INT");
        assert_eq!(d.normalize_type("numeric(8,2)"), "DECIMAL(8,2)");
        assert_eq!(d.resolve_operator("not regexp").unwrap(), "NOT REGEXP");
        assert!(d.resolve_operator("ILIKE").is_err());
    }

    #[test]
    fn test_boolean_hook() {
        let d = MysqlDialect::new();
        assert!(matches!(
            d.handle_custom_data_type("true", "TINYINT(1)", false),
            Some(Ok(Value::Bool(true)))
        ));
        assert!(matches!(
            d.handle_custom_data_type("maybe", "BOOLEAN", false),
            Some(Err(EngineError::Conversion { .. }))
        ));
        assert!(d.handle_custom_data_type("5", "TINYINT", false).is_none());
        assert!(d.handle_custom_data_type("", "BOOLEAN", true).is_none());
    }

    #[test]
    fn test_integer_primary_key_auto_increments() {
        let d = MysqlDialect::new();
        let cols = [
            ColumnDef {
                name: "id".into(),
                type_name: "INT".into(),
                primary: true,
                nullable: false,
            },
            ColumnDef {
                name: "email".into(),
                type_name: "VARCHAR(255)".into(),
                primary: false,
                nullable: true,
            },
        ];
        assert_eq!(
            d.create_table_query("", "users", &cols).unwrap(),
            "CREATE TABLE `users` (`id` INT PRIMARY KEY AUTO_INCREMENT, `email` VARCHAR(255))"
        );
    }
}
