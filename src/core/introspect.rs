//! Schema introspection
//!
//! Column facts come from the driver's own statement description when the
//! adapter offers one, and from the dialect's catalog queries otherwise.
//! Everything except [`SchemaIntrospector::get_columns`] and the storage-unit
//! listing degrades to an empty result instead of failing: a schema view must
//! not break because one capability is missing.

use super::connection::{NativeColumn, NativeConnection, QueryResult};
use super::constraints::{apply_check_clause, extract_check_clauses};
use super::dialect::{ConstraintSource, DialectFacts};
use super::error::Result;
use super::model::{
    Column, ColumnConstraints, ForeignKeyRelationship, GraphUnit, GraphUnitRelationship, Record,
    RelationshipType, StorageUnit,
};
use super::query_builder::BuiltQuery;
use super::types::{allows_length, allows_precision, format_column_type, TypeSpec};
use super::value::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Catalog reader for one dialect
#[derive(Clone, Copy)]
pub struct SchemaIntrospector<'d> {
    dialect: &'d dyn DialectFacts,
}

impl<'d> SchemaIntrospector<'d> {
    pub fn new(dialect: &'d dyn DialectFacts) -> Self {
        Self { dialect }
    }

    async fn run(&self, conn: &mut dyn NativeConnection, query: &BuiltQuery) -> Result<QueryResult> {
        conn.query(&query.sql, &query.params).await
    }

    /// Rows of a single-column listing query
    async fn list(&self, conn: &mut dyn NativeConnection, query: Option<BuiltQuery>) -> Result<Vec<String>> {
        let Some(query) = query else {
            return Ok(Vec::new());
        };
        let result = self.run(conn, &query).await?;
        Ok((0..result.len()).map(|r| result.text(r, 0)).collect())
    }

    pub async fn get_all_schemas(&self, conn: &mut dyn NativeConnection) -> Result<Vec<String>> {
        self.list(conn, self.dialect.all_schemas_query()).await
    }

    pub async fn get_databases(&self, conn: &mut dyn NativeConnection) -> Result<Vec<String>> {
        self.list(conn, self.dialect.databases_query()).await
    }

    /// Tables of `schema` with their summary attributes.
    ///
    /// The first column of the dialect's table query is the name; every other
    /// column becomes an attribute keyed by its column name.
    pub async fn get_storage_units(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
    ) -> Result<Vec<StorageUnit>> {
        let result = self.run(conn, &self.dialect.table_info_query(schema)).await?;
        let mut units = Vec::with_capacity(result.len());
        for row in 0..result.len() {
            let name = result.text(row, 0);
            if name.is_empty() {
                continue;
            }
            let attributes = result
                .columns
                .iter()
                .enumerate()
                .skip(1)
                .map(|(col, meta)| Record::new(meta.name.clone(), result.text(row, col)))
                .collect();
            units.push(StorageUnit { name, attributes });
        }

        // column facts ride along as trailing attributes
        match self.schema_columns(conn, schema).await {
            Ok(tables) => {
                for (table, columns) in tables {
                    if let Some(unit) = units.iter_mut().find(|u| u.name == table) {
                        unit.attributes.extend(columns);
                    }
                }
            }
            Err(e) => debug!(target: "introspect", schema, error = %e, "Column attributes unavailable"),
        }

        if self.dialect.storage_unit_needs_count() {
            for unit in &mut units {
                let count = self.count_rows(conn, schema, &unit.name).await;
                unit.attributes.push(Record::new(
                    "Count",
                    count.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string()),
                ));
            }
        }
        debug!(target: "introspect", schema, units = units.len(), "Listed storage units");
        Ok(units)
    }

    async fn count_rows(&self, conn: &mut dyn NativeConnection, schema: &str, table: &str) -> Option<u64> {
        let full = self.dialect.build_full_table_name(schema, table).ok()?;
        match conn.query(&format!("SELECT COUNT(*) FROM {}", full), &[]).await {
            Ok(result) => result.rows.first().and_then(|r| r.first()).and_then(value_u64),
            Err(e) => {
                debug!(target: "introspect", table, error = %e, "Row count unavailable");
                None
            }
        }
    }

    /// Ordered columns of `table` with normalized types, keys and references
    pub async fn get_columns(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<Column>> {
        let mut columns = match self.describe_columns(conn, schema, table).await {
            Some(columns) if !columns.is_empty() => columns,
            _ => self.catalog_columns(conn, schema, table).await?,
        };

        let primary_keys = self.get_primary_keys(conn, schema, table).await;
        let foreign_keys = self.get_foreign_keys(conn, schema, table).await;
        let auto_increment = self.auto_increment_columns(conn, schema, table).await;

        for column in &mut columns {
            column.is_primary = primary_keys.iter().any(|k| k == &column.name);
            if let Some(fk) = foreign_keys.get(&column.name) {
                column.is_foreign_key = true;
                column.referenced_table = Some(fk.referenced_table.clone());
                column.referenced_column = Some(fk.referenced_column.clone());
            }
            column.is_auto_increment = auto_increment.contains(&column.name)
                || TypeSpec::parse(&column.type_name).base_type.ends_with("SERIAL");
        }
        Ok(columns)
    }

    /// Capability path; `None` when the adapter cannot describe the table
    async fn describe_columns(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
        table: &str,
    ) -> Option<Vec<Column>> {
        let full = self.dialect.build_full_table_name(schema, table).ok()?;
        let described = match conn.describe_table(&full).await {
            Ok(described) => described,
            Err(e) => {
                debug!(target: "introspect", table, error = %e, "Describe unavailable, using catalog");
                return None;
            }
        };
        let mut columns: Vec<Column> = described.iter().map(|c| self.native_column(c)).collect();

        // statement descriptions rarely carry declared lengths; take them from the catalog
        let missing_sizes = described.iter().any(|c| {
            let spec = TypeSpec::parse(&self.dialect.normalize_type(&c.type_name));
            (allows_length(&spec.base_type) && c.length.is_none() && spec.length.is_none())
                || (allows_precision(&spec.base_type) && c.precision.is_none() && spec.precision.is_none())
        });
        if missing_sizes {
            if let Ok(catalog) = self.catalog_columns(conn, schema, table).await {
                for column in &mut columns {
                    if let Some(found) = catalog.iter().find(|c| c.name == column.name) {
                        column.type_name = found.type_name.clone();
                        column.length = column.length.or(found.length);
                        column.precision = column.precision.or(found.precision);
                        column.scale = column.scale.or(found.scale);
                    }
                }
            }
        }
        Some(columns)
    }

    fn native_column(&self, native: &NativeColumn) -> Column {
        self.build_column(
            &native.name,
            &native.type_name,
            native.length,
            native.precision,
            native.scale,
        )
    }

    fn build_column(
        &self,
        name: &str,
        raw_type: &str,
        length: Option<u32>,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> Column {
        let spec = TypeSpec::parse(&self.dialect.normalize_type(raw_type));
        let length = length.or(spec.length).filter(|_| allows_length(&spec.base_type));
        let (precision, scale) = if allows_precision(&spec.base_type) {
            (precision.or(spec.precision), scale.or(spec.scale))
        } else {
            (None, None)
        };
        let mut column = Column::new(
            name,
            format_column_type(&spec.base_type, length, precision, scale),
        );
        column.length = length;
        column.precision = precision;
        column.scale = scale.filter(|_| precision.is_some());
        column
    }

    /// Raw catalog fallback
    async fn catalog_columns(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<Column>> {
        let result = self
            .run(conn, &self.dialect.column_types_query(schema, table))
            .await?;
        Ok(result
            .rows
            .iter()
            .map(|row| {
                self.build_column(
                    &cell_text(row, 0),
                    &cell_text(row, 1),
                    cell_u32(row, 2),
                    cell_u32(row, 3),
                    cell_u32(row, 4),
                )
            })
            .filter(|c| !c.name.is_empty())
            .collect())
    }

    /// `(column, normalized type)` in ordinal order
    pub async fn get_ordered_column_types(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<(String, String)>> {
        let result = self
            .run(conn, &self.dialect.column_types_query(schema, table))
            .await?;
        Ok(result
            .rows
            .iter()
            .map(|row| (cell_text(row, 0), self.dialect.normalize_type(&cell_text(row, 1))))
            .filter(|(name, _)| !name.is_empty())
            .collect())
    }

    /// `column -> normalized type`
    pub async fn get_column_types(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
        table: &str,
    ) -> Result<HashMap<String, String>> {
        Ok(self
            .get_ordered_column_types(conn, schema, table)
            .await?
            .into_iter()
            .collect())
    }

    /// Primary-key columns in key order; empty on failure
    pub async fn get_primary_keys(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
        table: &str,
    ) -> Vec<String> {
        match self.run(conn, &self.dialect.primary_key_query(schema, table)).await {
            Ok(result) => result
                .rows
                .iter()
                .map(|row| cell_text(row, 0))
                .filter(|name| !name.is_empty())
                .collect(),
            Err(e) => {
                warn!(target: "introspect", schema, table, error = %e, "Failed to read primary keys");
                Vec::new()
            }
        }
    }

    /// `column -> reference`; empty on failure
    pub async fn get_foreign_keys(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
        table: &str,
    ) -> HashMap<String, ForeignKeyRelationship> {
        match self.run(conn, &self.dialect.foreign_key_query(schema, table)).await {
            Ok(result) => result
                .rows
                .iter()
                .filter_map(|row| {
                    let column_name = cell_text(row, 0);
                    if column_name.is_empty() {
                        return None;
                    }
                    Some((
                        column_name.clone(),
                        ForeignKeyRelationship {
                            column_name,
                            referenced_table: cell_text(row, 1),
                            referenced_column: cell_text(row, 2),
                        },
                    ))
                })
                .collect(),
            Err(e) => {
                warn!(target: "introspect", schema, table, error = %e, "Failed to read foreign keys");
                HashMap::new()
            }
        }
    }

    async fn auto_increment_columns(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
        table: &str,
    ) -> Vec<String> {
        let mut columns = Vec::new();
        for cq in self.dialect.constraint_queries(schema, table) {
            if cq.source != ConstraintSource::ColumnDetails {
                continue;
            }
            if let Ok(result) = self.run(conn, &cq.query).await {
                columns.extend(
                    result
                        .rows
                        .iter()
                        .filter(|row| row.get(2).map(value_flag).unwrap_or(false))
                        .map(|row| cell_text(row, 0)),
                );
            }
        }
        columns
    }

    /// Constraint facts per column; empty on failure.
    ///
    /// Each constraint query is independent: one that fails is logged and the
    /// others still contribute.
    pub async fn get_constraints(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
        table: &str,
    ) -> HashMap<String, ColumnConstraints> {
        let mut constraints: HashMap<String, ColumnConstraints> = HashMap::new();

        if let Ok(columns) = self.catalog_columns(conn, schema, table).await {
            for column in columns {
                let entry = constraints.entry(column.name.clone()).or_default();
                entry.type_name = Some(column.type_name);
                entry.length = column.length;
                entry.precision = column.precision;
                entry.scale = column.scale;
            }
        }

        for key in self.get_primary_keys(conn, schema, table).await {
            constraints.entry(key).or_default().primary = Some(true);
        }

        for cq in self.dialect.constraint_queries(schema, table) {
            let result = match self.run(conn, &cq.query).await {
                Ok(result) => result,
                Err(e) => {
                    debug!(
                        target: "introspect",
                        schema,
                        table,
                        source = ?cq.source,
                        error = %e,
                        "Constraint query failed"
                    );
                    continue;
                }
            };
            apply_constraint_rows(cq.source, &result, &mut constraints);
        }

        constraints.retain(|_, c| !c.is_empty());
        constraints
    }

    /// Storage units joined with their outgoing relationships
    pub async fn get_graph(&self, conn: &mut dyn NativeConnection, schema: &str) -> Result<Vec<GraphUnit>> {
        let units = self.get_storage_units(conn, schema).await?;
        let edges = match self.run(conn, &self.dialect.graph_query(schema)).await {
            Ok(result) => result
                .rows
                .iter()
                .map(|row| {
                    (
                        cell_text(row, 0),
                        cell_text(row, 1),
                        RelationshipType::from_label(&cell_text(row, 2)),
                    )
                })
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(target: "introspect", schema, error = %e, "Failed to read relationships");
                Vec::new()
            }
        };

        Ok(units
            .into_iter()
            .map(|unit| {
                let mut relations: Vec<GraphUnitRelationship> = Vec::new();
                for (from, to, relationship_type) in &edges {
                    if from != &unit.name || to.is_empty() {
                        continue;
                    }
                    let relation = GraphUnitRelationship {
                        name: to.clone(),
                        relationship_type: *relationship_type,
                    };
                    if !relations.contains(&relation) {
                        relations.push(relation);
                    }
                }
                GraphUnit { unit, relations }
            })
            .collect())
    }

    /// Plain-text schema description for query generation:
    /// a `table: name` line followed by one `- column (TYPE)` line per column.
    pub async fn schema_text(&self, conn: &mut dyn NativeConnection, schema: &str) -> Result<String> {
        let mut text = String::new();
        for (table, columns) in self.schema_columns(conn, schema).await? {
            text.push_str(&format!("table: {}\n", table));
            for column in columns {
                text.push_str(&format!("- {} ({})\n", column.key, column.value));
            }
        }
        Ok(text)
    }

    /// `(table, [column -> normalized type])` in catalog order
    async fn schema_columns(
        &self,
        conn: &mut dyn NativeConnection,
        schema: &str,
    ) -> Result<Vec<(String, Vec<Record>)>> {
        let result = self.run(conn, &self.dialect.schema_columns_query(schema)).await?;
        let mut tables: Vec<(String, Vec<Record>)> = Vec::new();
        for row in &result.rows {
            let table = cell_text(row, 0);
            let column = Record::new(
                cell_text(row, 1),
                self.dialect.normalize_type(&cell_text(row, 2)),
            );
            match tables.last_mut() {
                Some((name, cols)) if *name == table => cols.push(column),
                _ => tables.push((table, vec![column])),
            }
        }
        Ok(tables)
    }
}

fn apply_constraint_rows(
    source: ConstraintSource,
    result: &QueryResult,
    constraints: &mut HashMap<String, ColumnConstraints>,
) {
    for row in &result.rows {
        match source {
            ConstraintSource::Nullability => {
                let column = cell_text(row, 0);
                if column.is_empty() {
                    continue;
                }
                let nullable = row.get(1).map(value_flag).unwrap_or(true);
                constraints.entry(column).or_default().nullable = Some(nullable);
            }
            ConstraintSource::Unique => {
                let column = cell_text(row, 0);
                if !column.is_empty() {
                    constraints.entry(column).or_default().unique = Some(true);
                }
            }
            ConstraintSource::CheckClause => {
                if let Some(last) = row.last() {
                    apply_check_clause(&last.to_display_string(), constraints);
                }
            }
            ConstraintSource::TableDefinition => {
                for clause in extract_check_clauses(&cell_text(row, 0)) {
                    apply_check_clause(&clause, constraints);
                }
            }
            ConstraintSource::ColumnDetails => {
                let column = cell_text(row, 0);
                if column.is_empty() {
                    continue;
                }
                let entry = constraints.entry(column).or_default();
                if let Some(default) = row.get(1).filter(|v| !v.is_null()) {
                    entry.default = Some(default.to_display_string());
                }
                if row.get(2).map(value_flag).unwrap_or(false) {
                    entry.auto_increment = Some(true);
                }
                let comment = cell_text(row, 3);
                if !comment.is_empty() {
                    entry.comment = Some(comment);
                }
            }
        }
    }
}

fn cell_text(row: &[Value], index: usize) -> String {
    row.get(index).map(Value::to_display_string).unwrap_or_default()
}

fn cell_u32(row: &[Value], index: usize) -> Option<u32> {
    row.get(index)
        .and_then(value_u64)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
}

pub(crate) fn value_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Int(v) => u64::try_from(*v).ok(),
        Value::UInt(v) => Some(*v),
        Value::Float(v) if *v >= 0.0 => Some(*v as u64),
        Value::Null | Value::NullOf(_) => None,
        other => other.to_display_string().trim().parse().ok(),
    }
}

/// `YES`/`NO`, `1`/`0`, `t`/`f` and native booleans
fn value_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(v) => *v != 0,
        Value::UInt(v) => *v != 0,
        other => matches!(
            other.to_display_string().trim().to_lowercase().as_str(),
            "yes" | "y" | "1" | "t" | "true"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite::SqliteDialect;
    use crate::core::connection::ColumnMeta;
    use crate::core::database_types::DatabaseType;
    use crate::core::error::EngineError;
    use async_trait::async_trait;

    /// Answers catalog queries by substring match
    struct CatalogConn {
        answers: Vec<(&'static str, QueryResult)>,
        describe: Option<Vec<NativeColumn>>,
    }

    #[async_trait]
    impl NativeConnection for CatalogConn {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Sqlite
        }
        async fn ping(&mut self) -> Result<()> {
            Ok(())
        }
        async fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<u64> {
            Ok(0)
        }
        async fn query(&mut self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
            self.answers
                .iter()
                .find(|(needle, _)| sql.contains(needle))
                .map(|(_, r)| r.clone())
                .ok_or_else(|| EngineError::query(format!("no such table: {sql}")))
        }
        async fn begin(&mut self) -> Result<()> {
            Ok(())
        }
        async fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        async fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            false
        }
        async fn describe_table(&mut self, full_table_name: &str) -> Result<Vec<NativeColumn>> {
            self.describe
                .clone()
                .ok_or_else(|| EngineError::unsupported(full_table_name.to_string()))
        }
    }

    fn result(cols: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult {
            columns: cols.iter().map(|c| ColumnMeta::new(*c, "TEXT")).collect(),
            rows,
        }
    }

    fn catalog() -> Vec<(&'static str, QueryResult)> {
        vec![
            (
                "SELECT name, type, NULL",
                result(
                    &["name", "type", "l", "p", "s"],
                    vec![
                        vec!["id".into(), "INTEGER".into(), Value::Null, Value::Null, Value::Null],
                        vec!["name".into(), "VARCHAR(40)".into(), Value::Null, Value::Null, Value::Null],
                        vec!["owner_id".into(), "INT".into(), Value::Null, Value::Null, Value::Null],
                    ],
                ),
            ),
            ("WHERE pk > 0", result(&["name"], vec![vec!["id".into()]])),
            (
                "pragma_foreign_key_list(?)",
                result(
                    &["from", "table", "to"],
                    vec![vec!["owner_id".into(), "owners".into(), "id".into()]],
                ),
            ),
            (
                "\"notnull\"",
                result(
                    &["name", "nullable"],
                    vec![
                        vec!["id".into(), "NO".into()],
                        vec!["name".into(), "YES".into()],
                    ],
                ),
            ),
            (
                "SELECT sql FROM sqlite_master",
                result(
                    &["sql"],
                    vec![vec![
                        "CREATE TABLE pets (id INTEGER PRIMARY KEY, name VARCHAR(40) CHECK (name IN ('rex', 'tom')), owner_id INT CHECK (owner_id > 0))".into(),
                    ]],
                ),
            ),
            (
                "dflt_value",
                result(
                    &["name", "dflt", "ai", "comment"],
                    vec![
                        vec!["id".into(), Value::Null, Value::Int(1), Value::Null],
                        vec!["name".into(), "'rex'".into(), Value::Int(0), Value::Null],
                    ],
                ),
            ),
        ]
    }

    #[tokio::test]
    async fn test_columns_from_catalog_fallback() {
        let dialect = SqliteDialect::new();
        let intro = SchemaIntrospector::new(&dialect);
        let mut conn = CatalogConn {
            answers: catalog(),
            describe: None,
        };
        let cols = intro.get_columns(&mut conn, "", "pets").await.unwrap();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[0].type_name, "INTEGER");
        assert!(cols[0].is_primary);
        assert!(cols[0].is_auto_increment);
        // TEXT carries no user length in SQLite
        assert_eq!(cols[1].type_name, "TEXT");
        assert_eq!(cols[1].length, None);
        assert!(cols[2].is_foreign_key);
        assert_eq!(cols[2].referenced_table.as_deref(), Some("owners"));
    }

    #[tokio::test]
    async fn test_columns_prefer_describe() {
        let dialect = SqliteDialect::new();
        let intro = SchemaIntrospector::new(&dialect);
        let mut conn = CatalogConn {
            answers: catalog(),
            describe: Some(vec![NativeColumn {
                name: "only".into(),
                type_name: "BIGINT".into(),
                ..Default::default()
            }]),
        };
        let cols = intro.get_columns(&mut conn, "", "pets").await.unwrap();
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].name, "only");
        assert_eq!(cols[0].type_name, "INTEGER");
    }

    #[tokio::test]
    async fn test_constraints_merge_sources() {
        let dialect = SqliteDialect::new();
        let intro = SchemaIntrospector::new(&dialect);
        let mut conn = CatalogConn {
            answers: catalog(),
            describe: None,
        };
        let constraints = intro.get_constraints(&mut conn, "", "pets").await;
        let id = &constraints["id"];
        assert_eq!(id.primary, Some(true));
        assert_eq!(id.nullable, Some(false));
        assert_eq!(id.auto_increment, Some(true));

        let name = &constraints["name"];
        assert_eq!(name.nullable, Some(true));
        assert_eq!(name.default.as_deref(), Some("'rex'"));
        assert_eq!(
            name.check_values,
            Some(vec!["rex".to_string(), "tom".to_string()])
        );
        assert_eq!(constraints["owner_id"].check_min, Some(1.0));
    }

    #[tokio::test]
    async fn test_failures_degrade_to_empty() {
        let dialect = SqliteDialect::new();
        let intro = SchemaIntrospector::new(&dialect);
        let mut conn = CatalogConn {
            answers: Vec::new(),
            describe: None,
        };
        assert!(intro.get_primary_keys(&mut conn, "", "t").await.is_empty());
        assert!(intro.get_foreign_keys(&mut conn, "", "t").await.is_empty());
        assert!(intro.get_constraints(&mut conn, "", "t").await.is_empty());
        assert!(intro.get_columns(&mut conn, "", "t").await.is_err());
    }

    #[tokio::test]
    async fn test_graph_joins_relations() {
        let dialect = SqliteDialect::new();
        let intro = SchemaIntrospector::new(&dialect);
        let mut conn = CatalogConn {
            answers: vec![
                (
                    "AS \"Type\"",
                    result(
                        &["table_name", "Type"],
                        vec![
                            vec!["owners".into(), "table".into()],
                            vec!["pets".into(), "table".into()],
                        ],
                    ),
                ),
                ("COUNT(*)", result(&["c"], vec![vec![Value::Int(2)]])),
                (
                    "AS table1",
                    result(
                        &["table1", "table2", "relation"],
                        vec![vec!["owners".into(), "pets".into(), "OneToMany".into()]],
                    ),
                ),
            ],
            describe: None,
        };
        let graph = intro.get_graph(&mut conn, "").await.unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph[0].unit.attribute("Count"), Some("2"));
        assert_eq!(
            graph[0].relations,
            vec![GraphUnitRelationship {
                name: "pets".into(),
                relationship_type: RelationshipType::OneToMany,
            }]
        );
        assert!(graph[1].relations.is_empty());
    }

    #[tokio::test]
    async fn test_schema_text_groups_by_table() {
        let dialect = SqliteDialect::new();
        let intro = SchemaIntrospector::new(&dialect);
        let mut conn = CatalogConn {
            answers: vec![(
                "pragma_table_info(m.name)",
                result(
                    &["table_name", "column_name", "data_type"],
                    vec![
                        vec!["owners".into(), "id".into(), "INTEGER".into()],
                        vec!["pets".into(), "id".into(), "INTEGER".into()],
                        vec!["pets".into(), "name".into(), "TEXT".into()],
                    ],
                ),
            )],
            describe: None,
        };
        let text = intro.schema_text(&mut conn, "").await.unwrap();
        assert_eq!(
            text,
            "table: owners\n- id (INTEGER)\ntable: pets\n- id (INTEGER)\n- name (TEXT)\n"
        );
    }
}
