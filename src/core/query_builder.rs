//! Parameterized query builder
//!
//! Translates [`WhereCondition`] trees, sort lists and row payloads into SQL text
//! for one dialect. Comparison values only ever travel in
//! [`BuiltQuery::params`]; the text carries placeholders and quoted identifiers.

use super::convert::TypeConverter;
use super::dialect::{ArrayBinding, DialectFacts};
use super::error::{EngineError, Result};
use super::model::{AtomicCondition, ColumnDef, SortCondition, WhereCondition};
use super::value::Value;
use std::collections::HashMap;

/// SQL text plus its bound parameters, in placeholder order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl BuiltQuery {
    /// Query without parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Options for [`QueryBuilder::select_query`]
#[derive(Debug, Clone, Default)]
pub struct SelectOptions<'q> {
    /// Rendered select-list expressions; empty selects `*`
    pub projection: Vec<String>,
    pub condition: Option<&'q WhereCondition>,
    pub sort: &'q [SortCondition],
    /// ORDER BY body used when `sort` is empty
    pub default_order: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Placeholder allocator that continues numbering across clauses
struct ParamList<'d> {
    dialect: &'d dyn DialectFacts,
    values: Vec<Value>,
}

impl<'d> ParamList<'d> {
    fn new(dialect: &'d dyn DialectFacts, values: Vec<Value>) -> Self {
        Self { dialect, values }
    }

    fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }
}

/// Dialect-aware SQL builder
///
/// # Example
///
/// ```ignore
/// let builder = QueryBuilder::new(&converter);
/// let table = builder.build_full_table_name("public", "users")?;
/// let cond = WhereCondition::atomic("age", ">=", "18", "INTEGER");
/// let query = builder.count_query(&table, Some(&cond), &HashMap::new())?;
/// assert_eq!(query.sql, r#"SELECT COUNT(*) FROM "public"."users" WHERE "age" >= $1"#);
/// ```
pub struct QueryBuilder<'a> {
    converter: &'a TypeConverter,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(converter: &'a TypeConverter) -> Self {
        Self { converter }
    }

    pub fn dialect(&self) -> &'a dyn DialectFacts {
        self.converter.dialect()
    }

    /// Quote one identifier through the dialect
    pub fn quote_identifier(&self, ident: &str) -> Result<String> {
        self.dialect().quote_identifier(ident)
    }

    pub fn build_full_table_name(&self, schema: &str, table: &str) -> Result<String> {
        self.dialect().build_full_table_name(schema, table)
    }

    /// ORDER BY body in listed order, empty when `sort` is empty
    pub fn build_order_by(&self, sort: &[SortCondition]) -> Result<String> {
        let terms = sort
            .iter()
            .map(|s| {
                Ok(format!(
                    "{} {}",
                    self.quote_identifier(&s.column)?,
                    s.direction.as_sql()
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(terms.join(", "))
    }

    /// Append a WHERE clause for `condition` to `base`.
    ///
    /// Comparison values are typed from `column_types` first and the condition's
    /// declared type second. Unconstrained trees leave `base` unchanged.
    pub fn apply_conditions(
        &self,
        base: BuiltQuery,
        condition: Option<&WhereCondition>,
        column_types: &HashMap<String, String>,
    ) -> Result<BuiltQuery> {
        let Some(condition) = condition else {
            return Ok(base);
        };
        let mut params = ParamList::new(self.dialect(), base.params);
        let mut sql = base.sql;
        if let Some(predicate) = self.render_condition(condition, column_types, &mut params)? {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        Ok(BuiltQuery::with_params(sql, params.values))
    }

    /// `SELECT` with filter, ordering and inline `LIMIT`/`OFFSET`
    pub fn select_query(
        &self,
        full_table: &str,
        options: &SelectOptions<'_>,
        column_types: &HashMap<String, String>,
    ) -> Result<BuiltQuery> {
        let projection = if options.projection.is_empty() {
            "*".to_string()
        } else {
            options.projection.join(", ")
        };
        let base = BuiltQuery::new(format!("SELECT {} FROM {}", projection, full_table));
        let mut query = self.apply_conditions(base, options.condition, column_types)?;

        let order = self.build_order_by(options.sort)?;
        if !order.is_empty() {
            query.sql.push_str(" ORDER BY ");
            query.sql.push_str(&order);
        } else if let Some(default_order) = options.default_order.as_deref().filter(|o| !o.is_empty()) {
            query.sql.push_str(" ORDER BY ");
            query.sql.push_str(default_order);
        }
        if let Some(limit) = options.limit {
            query.sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = options.offset.filter(|o| *o > 0) {
            query.sql.push_str(&format!(" OFFSET {}", offset));
        }
        Ok(query)
    }

    /// `SELECT COUNT(*)` under the same filter as the row query
    pub fn count_query(
        &self,
        full_table: &str,
        condition: Option<&WhereCondition>,
        column_types: &HashMap<String, String>,
    ) -> Result<BuiltQuery> {
        let base = BuiltQuery::new(format!("SELECT COUNT(*) FROM {}", full_table));
        self.apply_conditions(base, condition, column_types)
    }

    /// Multi-row `INSERT`; every row must match `columns`
    pub fn insert_query(
        &self,
        full_table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<BuiltQuery> {
        if columns.is_empty() || rows.is_empty() {
            return Err(EngineError::validation(
                "no values provided to insert into the table",
            ));
        }
        let quoted = columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Result<Vec<_>>>()?;

        let mut params = ParamList::new(self.dialect(), Vec::with_capacity(columns.len() * rows.len()));
        let mut tuples = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(EngineError::validation(format!(
                    "row {} has {} values but {} columns were given",
                    index + 1,
                    row.len(),
                    columns.len()
                )));
            }
            let placeholders: Vec<String> = row.iter().map(|v| params.push(v.clone())).collect();
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        Ok(BuiltQuery::with_params(
            format!(
                "INSERT INTO {} ({}) VALUES {}",
                full_table,
                quoted.join(", "),
                tuples.join(", ")
            ),
            params.values,
        ))
    }

    /// `UPDATE .. SET .. WHERE` with equality matches
    pub fn update_query(
        &self,
        full_table: &str,
        set: &[(String, Value)],
        matches: &[(String, Value)],
    ) -> Result<BuiltQuery> {
        if set.is_empty() {
            return Err(EngineError::validation("no columns to update"));
        }
        let mut params = ParamList::new(self.dialect(), Vec::new());
        let assignments = set
            .iter()
            .map(|(col, value)| {
                Ok(format!(
                    "{} = {}",
                    self.quote_identifier(col)?,
                    params.push(value.clone())
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut sql = format!(
            "{} {}",
            self.dialect().update_prefix(full_table),
            assignments.join(", ")
        );
        if !matches.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.equality_predicate(matches, &mut params)?);
        }
        Ok(BuiltQuery::with_params(sql, params.values))
    }

    /// `DELETE .. WHERE` with equality matches; an empty match list is refused
    pub fn delete_query(&self, full_table: &str, matches: &[(String, Value)]) -> Result<BuiltQuery> {
        if matches.is_empty() {
            return Err(EngineError::validation("no values provided to match rows for deletion"));
        }
        let mut params = ParamList::new(self.dialect(), Vec::new());
        let predicate = self.equality_predicate(matches, &mut params)?;
        Ok(BuiltQuery::with_params(
            format!("{} WHERE {}", self.dialect().delete_prefix(full_table), predicate),
            params.values,
        ))
    }

    pub fn create_table_query(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDef],
    ) -> Result<String> {
        self.dialect().create_table_query(schema, table, columns)
    }

    fn equality_predicate(
        &self,
        matches: &[(String, Value)],
        params: &mut ParamList<'_>,
    ) -> Result<String> {
        let terms = matches
            .iter()
            .map(|(col, value)| {
                let column = self.quote_identifier(col)?;
                Ok(if value.is_null() {
                    format!("{} IS NULL", column)
                } else {
                    format!("{} = {}", column, params.push(value.clone()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(terms.join(" AND "))
    }

    fn render_condition(
        &self,
        condition: &WhereCondition,
        column_types: &HashMap<String, String>,
        params: &mut ParamList<'_>,
    ) -> Result<Option<String>> {
        match condition {
            WhereCondition::Atomic(atomic) => {
                self.render_atomic(atomic, column_types, params).map(Some)
            }
            WhereCondition::And(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(part) = self.render_condition(child, column_types, params)? {
                        parts.push(part);
                    }
                }
                Ok(join_parts(parts, " AND "))
            }
            WhereCondition::Or(children) => {
                if condition.is_unconstrained() {
                    return Ok(None);
                }
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(part) = self.render_condition(child, column_types, params)? {
                        parts.push(part);
                    }
                }
                Ok(join_parts(parts, " OR "))
            }
        }
    }

    fn render_atomic(
        &self,
        atomic: &AtomicCondition,
        column_types: &HashMap<String, String>,
        params: &mut ParamList<'_>,
    ) -> Result<String> {
        let dialect = self.dialect();
        let op = dialect.resolve_operator(&atomic.operator)?;
        let column = dialect.quote_identifier(&atomic.key)?;
        let column_type = lookup_type(column_types, &atomic.key).unwrap_or(&atomic.column_type);

        match op {
            "IS NULL" | "IS NOT NULL" => Ok(format!("{} {}", column, op)),
            "IN" | "NOT IN" => {
                let negated = op == "NOT IN";
                let items: Vec<&str> = atomic
                    .value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect();
                if items.is_empty() {
                    return Ok(if negated { "1 = 1" } else { "1 = 0" }.to_string());
                }
                let values = items
                    .iter()
                    .map(|item| self.typed_value(item, column_type))
                    .collect::<Result<Vec<_>>>()?;
                match dialect.array_binding() {
                    ArrayBinding::Expand => {
                        let placeholders: Vec<String> =
                            values.into_iter().map(|v| params.push(v)).collect();
                        Ok(format!("{} {} ({})", column, op, placeholders.join(", ")))
                    }
                    ArrayBinding::Native => {
                        let placeholder = params.push(Value::Array(values));
                        if negated {
                            Ok(format!("NOT ({} = ANY({}))", column, placeholder))
                        } else {
                            Ok(format!("{} = ANY({})", column, placeholder))
                        }
                    }
                }
            }
            "BETWEEN" | "NOT BETWEEN" => {
                let bounds: Vec<&str> = atomic.value.split(',').map(str::trim).collect();
                if bounds.len() != 2 || bounds.iter().any(|b| b.is_empty()) {
                    return Err(EngineError::validation(
                        "invalid BETWEEN value; expected 'min,max'",
                    ));
                }
                let low = params.push(self.typed_value(bounds[0], column_type)?);
                let high = params.push(self.typed_value(bounds[1], column_type)?);
                Ok(format!("{} {} {} AND {}", column, op, low, high))
            }
            _ if is_pattern_operator(op) => {
                let placeholder = params.push(Value::Text(atomic.value.clone()));
                Ok(format!("{} {} {}", column, op, placeholder))
            }
            _ => {
                let placeholder = params.push(self.typed_value(&atomic.value, column_type)?);
                Ok(format!("{} {} {}", column, op, placeholder))
            }
        }
    }

    fn typed_value(&self, raw: &str, column_type: &str) -> Result<Value> {
        if column_type.trim().is_empty() {
            return Ok(Value::Text(raw.to_string()));
        }
        self.converter.convert_from_string(raw, column_type)
    }
}

fn join_parts(parts: Vec<String>, separator: &str) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(format!("({})", parts.join(separator))),
    }
}

fn lookup_type<'t>(column_types: &'t HashMap<String, String>, key: &str) -> Option<&'t String> {
    column_types
        .get(key)
        .or_else(|| {
            column_types
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, ty)| ty)
        })
        .filter(|ty| !ty.trim().is_empty())
}

/// Pattern operators compare against text whatever the column type
fn is_pattern_operator(op: &str) -> bool {
    matches!(
        op,
        "LIKE" | "NOT LIKE" | "ILIKE" | "NOT ILIKE" | "GLOB" | "REGEXP" | "NOT REGEXP"
    )
}
