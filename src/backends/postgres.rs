//! PostgreSQL dialect
//!
//! Catalog facts come from `information_schema` and `pg_catalog`. Placeholders
//! are numbered (`$1`, `$2`, ...) and `IN` lists bind as one array parameter.

use crate::core::database_types::DatabaseType;
use crate::core::dialect::{
    quote_with, ArrayBinding, ConstraintQuery, ConstraintSource, DialectFacts, BASE_OPERATORS,
};
use crate::core::query_builder::BuiltQuery;
use crate::core::value::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Bound-parameter ceiling of the extended query protocol
pub const POSTGRES_MAX_PARAMETERS: usize = 65535;

static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("INT", "INTEGER"),
        ("INT2", "SMALLINT"),
        ("INT4", "INTEGER"),
        ("INT8", "BIGINT"),
        ("SERIAL2", "SMALLSERIAL"),
        ("SERIAL4", "SERIAL"),
        ("SERIAL8", "BIGSERIAL"),
        ("FLOAT", "DOUBLE PRECISION"),
        ("FLOAT4", "REAL"),
        ("FLOAT8", "DOUBLE PRECISION"),
        ("BOOL", "BOOLEAN"),
        ("VARCHAR", "CHARACTER VARYING"),
        ("CHAR", "CHARACTER"),
        ("BPCHAR", "CHARACTER"),
        ("TIMESTAMP WITHOUT TIME ZONE", "TIMESTAMP"),
        ("TIMESTAMPTZ", "TIMESTAMP WITH TIME ZONE"),
        ("TIME WITHOUT TIME ZONE", "TIME"),
        ("TIMETZ", "TIME WITH TIME ZONE"),
    ]
    .into_iter()
    .collect()
});

static OPERATORS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut ops = BASE_OPERATORS.clone();
    ops.insert("ILIKE", "ILIKE");
    ops.insert("NOT ILIKE", "NOT ILIKE");
    ops
});

const SUPPORTED_TYPES: &[&str] = &[
    "SMALLINT",
    "INTEGER",
    "BIGINT",
    "DECIMAL",
    "NUMERIC",
    "REAL",
    "DOUBLE PRECISION",
    "SMALLSERIAL",
    "SERIAL",
    "BIGSERIAL",
    "MONEY",
    "CHAR",
    "CHARACTER",
    "VARCHAR",
    "CHARACTER VARYING",
    "TEXT",
    "BYTEA",
    "TIMESTAMP",
    "TIMESTAMPTZ",
    "TIMESTAMP WITH TIME ZONE",
    "DATE",
    "TIME",
    "TIMETZ",
    "TIME WITH TIME ZONE",
    "BOOLEAN",
    "POINT",
    "LINE",
    "LSEG",
    "BOX",
    "PATH",
    "POLYGON",
    "CIRCLE",
    "CIDR",
    "INET",
    "MACADDR",
    "UUID",
    "XML",
    "JSON",
    "JSONB",
    "ARRAY",
    "HSTORE",
];

const GRAPH_QUERY: &str = r#"
WITH fk_constraints AS (
    SELECT DISTINCT ccu.table_name AS table1, tc.table_name AS table2, 'OneToMany' AS relation
    FROM information_schema.table_constraints AS tc
    JOIN information_schema.key_column_usage AS kcu ON tc.constraint_name = kcu.constraint_name
    JOIN information_schema.constraint_column_usage AS ccu ON ccu.constraint_name = tc.constraint_name
    WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND ccu.table_schema = $1
),
pk_constraints AS (
    SELECT DISTINCT tc.table_name AS table1, ccu.table_name AS table2, 'OneToOne' AS relation
    FROM information_schema.table_constraints AS tc
    JOIN information_schema.key_column_usage AS kcu ON tc.constraint_name = kcu.constraint_name
    JOIN information_schema.constraint_column_usage AS ccu ON ccu.constraint_name = tc.constraint_name
    WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 AND ccu.table_schema = $1
        AND tc.table_name != ccu.table_name
),
unique_constraints AS (
    SELECT DISTINCT tc.table_name AS table1, ccu.table_name AS table2, 'ManyToOne' AS relation
    FROM information_schema.table_constraints AS tc
    JOIN information_schema.key_column_usage AS kcu ON tc.constraint_name = kcu.constraint_name
    JOIN information_schema.constraint_column_usage AS ccu ON ccu.constraint_name = tc.constraint_name
    WHERE tc.constraint_type = 'UNIQUE' AND tc.table_schema = $1 AND ccu.table_schema = $1
        AND tc.table_name != ccu.table_name
),
many_to_many_constraints AS (
    SELECT DISTINCT kcu1.table_name AS table1, kcu2.table_name AS table2, 'ManyToMany' AS relation
    FROM information_schema.key_column_usage kcu1
    JOIN information_schema.referential_constraints rc ON kcu1.constraint_name = rc.constraint_name
    JOIN information_schema.key_column_usage kcu2 ON kcu2.constraint_name = rc.unique_constraint_name
    WHERE kcu1.ordinal_position = 1 AND kcu2.ordinal_position = 2
        AND kcu1.table_schema = $1 AND kcu2.table_schema = $1
)
SELECT * FROM fk_constraints
UNION
SELECT * FROM pk_constraints
UNION
SELECT * FROM unique_constraints
UNION
SELECT * FROM many_to_many_constraints
"#;

/// PostgreSQL dialect facts
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }
}

fn schema_and_table(schema: &str, table: &str) -> Vec<Value> {
    vec![Value::from(schema), Value::from(table)]
}

impl DialectFacts for PostgresDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn max_parameters(&self) -> usize {
        POSTGRES_MAX_PARAMETERS
    }

    fn operators(&self) -> &HashMap<&'static str, &'static str> {
        &OPERATORS
    }

    fn array_binding(&self) -> ArrayBinding {
        ArrayBinding::Native
    }

    fn supported_column_types(&self) -> &[&'static str] {
        SUPPORTED_TYPES
    }

    fn alias_map(&self) -> &HashMap<&'static str, &'static str> {
        &ALIASES
    }

    fn all_schemas_query(&self) -> Option<BuiltQuery> {
        Some(BuiltQuery::new(
            "SELECT schema_name FROM information_schema.schemata ORDER BY schema_name",
        ))
    }

    fn databases_query(&self) -> Option<BuiltQuery> {
        Some(BuiltQuery::new(
            "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname",
        ))
    }

    fn table_info_query(&self, schema: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            "SELECT t.table_name, t.table_type AS \"Type\", \
             pg_size_pretty(pg_total_relation_size(quote_ident(t.table_schema) || '.' || quote_ident(t.table_name))) AS \"Total Size\", \
             pg_size_pretty(pg_relation_size(quote_ident(t.table_schema) || '.' || quote_ident(t.table_name))) AS \"Data Size\", \
             COALESCE(s.n_live_tup, 0) AS \"Count\" \
             FROM information_schema.tables t \
             LEFT JOIN pg_stat_user_tables s ON t.table_name = s.relname AND t.table_schema = s.schemaname \
             WHERE t.table_schema = $1 ORDER BY t.table_name",
            vec![Value::from(schema)],
        )
    }

    fn schema_columns_query(&self, schema: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            "SELECT table_name, column_name, data_type FROM information_schema.columns \
             WHERE table_schema = $1 ORDER BY table_name, ordinal_position",
            vec![Value::from(schema)],
        )
    }

    fn column_types_query(&self, schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            "SELECT column_name, \
             CASE WHEN data_type IN ('ARRAY', 'USER-DEFINED') THEN udt_name ELSE data_type END, \
             character_maximum_length, numeric_precision, numeric_scale \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
            schema_and_table(schema, table),
        )
    }

    fn primary_key_query(&self, schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            "SELECT a.attname FROM pg_index i \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             JOIN pg_class c ON c.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relname = $2 AND i.indisprimary \
             ORDER BY array_position(i.indkey::int2[], a.attnum)",
            schema_and_table(schema, table),
        )
    }

    fn foreign_key_query(&self, schema: &str, table: &str) -> BuiltQuery {
        BuiltQuery::with_params(
            "SELECT kcu.column_name, ccu.table_name, ccu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             JOIN information_schema.constraint_column_usage ccu \
               ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2",
            schema_and_table(schema, table),
        )
    }

    fn graph_query(&self, schema: &str) -> BuiltQuery {
        BuiltQuery::with_params(GRAPH_QUERY.trim(), vec![Value::from(schema)])
    }

    fn constraint_queries(&self, schema: &str, table: &str) -> Vec<ConstraintQuery> {
        let qualified = match (quote_with('"', schema), quote_with('"', table)) {
            (Ok(s), Ok(t)) => format!("{s}.{t}"),
            _ => format!("{schema}.{table}"),
        };
        vec![
            ConstraintQuery::new(
                ConstraintSource::Nullability,
                BuiltQuery::with_params(
                    "SELECT column_name, is_nullable FROM information_schema.columns \
                     WHERE table_schema = $1 AND table_name = $2",
                    schema_and_table(schema, table),
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::Unique,
                BuiltQuery::with_params(
                    "SELECT a.attname FROM pg_index i \
                     JOIN pg_class c ON c.oid = i.indrelid \
                     JOIN pg_namespace n ON n.oid = c.relnamespace \
                     JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey) \
                     WHERE n.nspname = $1 AND c.relname = $2 \
                     AND i.indisunique = true AND i.indnkeyatts = 1",
                    schema_and_table(schema, table),
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::CheckClause,
                BuiltQuery::with_params(
                    "SELECT conname, pg_get_constraintdef(oid) FROM pg_constraint \
                     WHERE contype = 'c' AND conrelid = $1::regclass",
                    vec![Value::Text(qualified)],
                ),
            ),
            ConstraintQuery::new(
                ConstraintSource::ColumnDetails,
                BuiltQuery::with_params(
                    "SELECT c.column_name, c.column_default, \
                     CASE WHEN c.is_identity = 'YES' OR c.column_default LIKE 'nextval(%' THEN 1 ELSE 0 END, \
                     col_description(format('%I.%I', c.table_schema, c.table_name)::regclass::oid, c.ordinal_position) \
                     FROM information_schema.columns c \
                     WHERE c.table_schema = $1 AND c.table_name = $2",
                    schema_and_table(schema, table),
                ),
            ),
        ]
    }

    fn orders_rows_by_primary_key(&self) -> bool {
        true
    }

    fn supports_returning(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases() {
        let d = PostgresDialect::new();
        assert_eq!(d.normalize_type("int4"), "INTEGER");
        assert_eq!(d.normalize_type("varchar(255)"), "CHARACTER VARYING(255)");
        assert_eq!(d.normalize_type("timestamptz"), "TIMESTAMP WITH TIME ZONE");
        assert_eq!(d.normalize_type("numeric(10,2)"), "NUMERIC(10,2)");
        assert!(d.is_supported_column_type("varchar(20)"));
        assert!(d.is_supported_column_type("jsonb"));
        assert!(!d.is_supported_column_type("NVARCHAR2"));
    }

    #[test]
    fn test_placeholders_and_quoting() {
        let d = PostgresDialect::new();
        assert_eq!(d.placeholder(3), "$3");
        assert_eq!(
            d.build_full_table_name("public", "users").unwrap(),
            "\"public\".\"users\""
        );
        assert_eq!(d.build_full_table_name("", "users").unwrap(), "\"users\"");
        assert_eq!(d.resolve_operator("not  ilike").unwrap(), "NOT ILIKE");
    }

    #[test]
    fn test_rows_ordered_by_primary_key() {
        let d = PostgresDialect::new();
        assert_eq!(
            d.rows_order_by(&["id".into(), "tenant".into()]).unwrap().as_deref(),
            Some("\"id\", \"tenant\"")
        );
        assert_eq!(d.rows_order_by(&[]).unwrap(), None);
    }

    #[test]
    fn test_graph_query_reuses_schema_param() {
        let q = PostgresDialect::new().graph_query("public");
        assert_eq!(q.params.len(), 1);
        assert!(q.sql.contains("'ManyToMany'"));
    }

    #[test]
    fn test_check_query_uses_qualified_name() {
        let queries = PostgresDialect::new().constraint_queries("public", "orders");
        let check = queries
            .iter()
            .find(|q| q.source == ConstraintSource::CheckClause)
            .unwrap();
        assert_eq!(check.query.params, vec![Value::Text("\"public\".\"orders\"".into())]);
    }
}
