//! Key-value plugin for Redis
//!
//! Every key is a storage unit. Its rows are laid out by key type:
//!
//! | type   | columns                   |
//! |--------|---------------------------|
//! | string | `value`                   |
//! | hash   | `field`, `value`          |
//! | list   | `index`, `value`          |
//! | set    | `index`, `value`          |
//! | zset   | `index`, `member`, `score`|

use crate::core::classifier::ErrorClassifier;
use crate::core::config::PluginConfig;
use crate::core::connection::NativeConnection;
use crate::core::database_types::DatabaseType;
use crate::core::error::{EngineError, Result};
use crate::core::manager::{ConnectionHandle, ConnectionManager};
use crate::core::model::{Column, GetRowsResult, GraphUnit, Record, StorageUnit, WhereCondition};
use crate::core::plugin::{escape_formula, format_header, Plugin, RowWriter, RowsRequest};
use crate::core::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_DATABASES: u64 = 16;
const LIST_TOMBSTONE: &str = "__rust_dialect_engine_deleted__";

/// Redis value type as reported by `TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    Hash,
    List,
    Set,
    ZSet,
}

impl KeyType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(KeyType::String),
            "hash" => Some(KeyType::Hash),
            "list" => Some(KeyType::List),
            "set" => Some(KeyType::Set),
            "zset" => Some(KeyType::ZSet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::Hash => "hash",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::ZSet => "zset",
        }
    }

    /// Command returning the element count
    fn size_command(&self) -> &'static str {
        match self {
            KeyType::String => "STRLEN",
            KeyType::Hash => "HLEN",
            KeyType::List => "LLEN",
            KeyType::Set => "SCARD",
            KeyType::ZSet => "ZCARD",
        }
    }

    pub fn column_names(&self) -> &'static [&'static str] {
        match self {
            KeyType::String => &["value"],
            KeyType::Hash => &["field", "value"],
            KeyType::List | KeyType::Set => &["index", "value"],
            KeyType::ZSet => &["index", "member", "score"],
        }
    }

    pub fn columns(&self) -> Vec<Column> {
        self.column_names()
            .iter()
            .map(|name| Column::new(*name, "string"))
            .collect()
    }
}

/// Redis plugin over the shared [`ConnectionManager`]
pub struct RedisPlugin {
    manager: Arc<ConnectionManager>,
    classifier: ErrorClassifier,
}

impl RedisPlugin {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            classifier: ErrorClassifier::new(DatabaseType::Redis),
        }
    }

    async fn run<T, F, Fut>(&self, config: &PluginConfig, operation: &str, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.manager
            .with_connection(config, f)
            .await
            .map_err(|e| self.classifier.classify(e, operation, &[("key", key.to_string())]))
    }
}

fn text_args(args: &[&str]) -> Vec<Value> {
    args.iter().map(|a| Value::Text(a.to_string())).collect()
}

/// Run a command and return its reply as a flat list of strings
async fn strings(conn: &mut dyn NativeConnection, command: &str, args: &[&str]) -> Result<Vec<String>> {
    let result = conn.query(command, &text_args(args)).await?;
    Ok(result
        .rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter(|v| !v.is_null())
        .map(|v| v.to_display_string())
        .collect())
}

async fn scalar(conn: &mut dyn NativeConnection, command: &str, args: &[&str]) -> Result<Value> {
    let result = conn.query(command, &text_args(args)).await?;
    Ok(result
        .rows
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .unwrap_or(Value::Null))
}

async fn key_type(conn: &mut dyn NativeConnection, key: &str) -> Result<Option<KeyType>> {
    let name = scalar(conn, "TYPE", &[key]).await?.to_display_string();
    Ok(KeyType::parse(&name))
}

async fn require_key_type(conn: &mut dyn NativeConnection, key: &str) -> Result<KeyType> {
    match key_type(conn, key).await? {
        Some(ty) => Ok(ty),
        None => Err(EngineError::unsupported(format!("unsupported Redis data type for key {}", key))),
    }
}

/// Pair up a flat `k1 v1 k2 v2 ...` reply
fn pairs(flat: Vec<String>) -> Vec<(String, String)> {
    let mut iter = flat.into_iter();
    let mut out = Vec::new();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        out.push((k, v));
    }
    out
}

/// All rows of a key in display layout
async fn load_rows(conn: &mut dyn NativeConnection, key: &str, ty: KeyType) -> Result<Vec<Vec<String>>> {
    Ok(match ty {
        KeyType::String => {
            let value = scalar(conn, "GET", &[key]).await?;
            vec![vec![value.to_display_string()]]
        }
        KeyType::Hash => {
            let mut rows: Vec<Vec<String>> = pairs(strings(conn, "HGETALL", &[key]).await?)
                .into_iter()
                .map(|(f, v)| vec![f, v])
                .collect();
            rows.sort_by(|a, b| a[0].cmp(&b[0]));
            rows
        }
        KeyType::List => strings(conn, "LRANGE", &[key, "0", "-1"])
            .await?
            .into_iter()
            .enumerate()
            .map(|(i, v)| vec![i.to_string(), v])
            .collect(),
        KeyType::Set => {
            let mut members = strings(conn, "SMEMBERS", &[key]).await?;
            members.sort();
            members
                .into_iter()
                .enumerate()
                .map(|(i, v)| vec![i.to_string(), v])
                .collect()
        }
        KeyType::ZSet => pairs(strings(conn, "ZRANGE", &[key, "0", "-1", "WITHSCORES"]).await?)
            .into_iter()
            .enumerate()
            .map(|(i, (member, score))| {
                let score = score
                    .parse::<f64>()
                    .map(|s| format!("{:.2}", s))
                    .unwrap_or(score);
                vec![i.to_string(), member, score]
            })
            .collect(),
    })
}

/// Compare as strings; unknown operators match nothing
fn evaluate(value: &str, operator: &str, target: &str) -> bool {
    match operator {
        "=" => value == target,
        "!=" => value != target,
        ">" => value > target,
        "<" => value < target,
        _ => false,
    }
}

/// Whether a row passes the filter.
///
/// Only atomic conditions on hashes and lists filter; anything else keeps the
/// row.
fn row_matches(ty: KeyType, row: &[String], condition: Option<&WhereCondition>) -> bool {
    let Some(WhereCondition::Atomic(atomic)) = condition else {
        return true;
    };
    let cell = match (ty, atomic.key.as_str()) {
        (KeyType::Hash, "field") => &row[0],
        (KeyType::Hash, "value") | (KeyType::List, "value") => &row[1],
        _ => return true,
    };
    evaluate(cell, &atomic.operator, &atomic.value)
}

fn paginate(rows: Vec<Vec<String>>, request: &RowsRequest) -> Vec<Vec<String>> {
    let skipped = rows.into_iter().skip(request.page_offset as usize);
    if request.page_size == 0 {
        skipped.collect()
    } else {
        skipped.take(request.page_size as usize).collect()
    }
}

fn record<'a>(values: &'a [Record], key: &str) -> Option<&'a str> {
    values.iter().find(|r| r.key == key).map(|r| r.value.as_str())
}

fn required<'a>(values: &'a [Record], key: &str, purpose: &str) -> Result<&'a str> {
    record(values, key).ok_or_else(|| EngineError::validation(format!("missing '{}' for {}", key, purpose)))
}

#[async_trait]
impl Plugin for RedisPlugin {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Redis
    }

    async fn is_available(&self, config: &PluginConfig) -> bool {
        match self
            .run(config, "is_available", "", |mut conn| async move { conn.ping().await })
            .await
        {
            Ok(()) => true,
            Err(e) => {
                debug!(target: "redis", error = %e, "Redis is not available");
                false
            }
        }
    }

    async fn get_databases(&self, config: &PluginConfig) -> Result<Vec<String>> {
        let count = self
            .run(config, "get_databases", "", |mut conn| async move {
                match strings(&mut conn, "CONFIG", &["GET", "databases"]).await {
                    Ok(reply) => Ok(pairs(reply)
                        .into_iter()
                        .find(|(k, _)| k == "databases")
                        .and_then(|(_, v)| v.parse::<u64>().ok())
                        .unwrap_or(DEFAULT_DATABASES)),
                    Err(e) => {
                        warn!(target: "redis", error = %e, "CONFIG GET failed, assuming default database count");
                        Ok(DEFAULT_DATABASES)
                    }
                }
            })
            .await?;
        Ok((0..count).map(|db| db.to_string()).collect())
    }

    async fn get_all_schemas(&self, _config: &PluginConfig) -> Result<Vec<String>> {
        Err(EngineError::unsupported("schemas are not supported for redis"))
    }

    async fn get_storage_units(&self, config: &PluginConfig, _schema: &str) -> Result<Vec<StorageUnit>> {
        self.run(config, "get_storage_units", "*", |mut conn| async move {
            let mut keys = strings(&mut conn, "KEYS", &["*"]).await?;
            keys.sort();
            let mut units = Vec::with_capacity(keys.len());
            for key in keys {
                let attributes = match key_type(&mut conn, &key).await? {
                    Some(ty) => {
                        let size = scalar(&mut conn, ty.size_command(), &[&key]).await?;
                        vec![
                            Record::new("Type", ty.as_str()),
                            Record::new("Size", size.to_display_string()),
                        ]
                    }
                    None => vec![Record::new("Type", "unknown")],
                };
                units.push(StorageUnit { name: key, attributes });
            }
            Ok(units)
        })
        .await
    }

    async fn storage_unit_exists(&self, config: &PluginConfig, _schema: &str, unit: &str) -> Result<bool> {
        self.run(config, "storage_unit_exists", unit, |mut conn| async move {
            Ok(scalar(&mut conn, "EXISTS", &[unit]).await?.as_i64().unwrap_or(0) > 0)
        })
        .await
    }

    /// Create `unit` from one field keyed by its type.
    ///
    /// `string` takes the raw value; `hash` a JSON object; `list` and `set` a
    /// JSON array of strings.
    async fn add_storage_unit(
        &self,
        config: &PluginConfig,
        _schema: &str,
        unit: &str,
        fields: &[Record],
    ) -> Result<bool> {
        let mut commands: Vec<(&str, Vec<String>)> = Vec::new();
        for field in fields {
            match field.key.as_str() {
                "string" => commands.push(("SET", vec![unit.to_string(), field.value.clone()])),
                "hash" => {
                    let map: HashMap<String, String> = serde_json::from_str(&field.value)?;
                    let mut entries: Vec<_> = map.into_iter().collect();
                    entries.sort();
                    let mut args = vec![unit.to_string()];
                    args.extend(entries.into_iter().flat_map(|(k, v)| [k, v]));
                    commands.push(("HSET", args));
                }
                "list" | "set" => {
                    let items: Vec<String> = serde_json::from_str(&field.value)?;
                    let mut args = vec![unit.to_string()];
                    args.extend(items);
                    let command = if field.key == "list" { "RPUSH" } else { "SADD" };
                    commands.push((command, args));
                }
                other => {
                    return Err(EngineError::validation(format!("unsupported field type: {}", other)));
                }
            }
        }
        if commands.is_empty() {
            return Err(EngineError::validation("no fields provided for key creation"));
        }

        self.run(config, "add_storage_unit", unit, |mut conn| async move {
            for (command, args) in commands {
                let args: Vec<Value> = args.into_iter().map(Value::Text).collect();
                conn.execute(command, &args).await?;
            }
            Ok(true)
        })
        .await
    }

    async fn add_row(&self, config: &PluginConfig, _schema: &str, unit: &str, values: &[Record]) -> Result<bool> {
        if values.is_empty() {
            return Err(EngineError::validation("no values provided to insert into the table"));
        }
        self.run(config, "add_row", unit, |mut conn| async move {
            let ty = require_key_type(&mut conn, unit).await?;
            let mut args = vec![Value::Text(unit.to_string())];
            let command = match ty {
                KeyType::Hash => {
                    for r in values {
                        args.push(Value::Text(r.key.clone()));
                        args.push(Value::Text(r.value.clone()));
                    }
                    "HSET"
                }
                KeyType::List | KeyType::Set => {
                    args.extend(values.iter().map(|r| Value::Text(r.value.clone())));
                    if ty == KeyType::List {
                        "RPUSH"
                    } else {
                        "SADD"
                    }
                }
                other => {
                    return Err(EngineError::validation(format!(
                        "unsupported storage unit type for adding rows: {}",
                        other.as_str()
                    )))
                }
            };
            conn.execute(command, &args).await?;
            Ok(true)
        })
        .await
    }

    async fn update_row(
        &self,
        config: &PluginConfig,
        _schema: &str,
        unit: &str,
        values: &[Record],
        _updated_columns: &[String],
    ) -> Result<bool> {
        self.run(config, "update_row", unit, |mut conn| async move {
            let ty = require_key_type(&mut conn, unit).await?;
            let key = Value::Text(unit.to_string());
            match ty {
                KeyType::String => {
                    if values.len() != 1 {
                        return Err(EngineError::validation("invalid number of fields for a string key"));
                    }
                    let value = required(values, "value", "string update")?;
                    conn.execute("SET", &[key, Value::Text(value.to_string())]).await?;
                }
                KeyType::Hash => {
                    let field = required(values, "field", "hash update")?;
                    let value = required(values, "value", "hash update")?;
                    conn.execute("HSET", &[key, Value::Text(field.to_string()), Value::Text(value.to_string())])
                        .await?;
                }
                KeyType::List => {
                    let index: i64 = required(values, "index", "list update")?
                        .trim()
                        .parse()
                        .map_err(|_| EngineError::validation("list index must be an integer"))?;
                    let value = required(values, "value", "list update")?;
                    conn.execute("LSET", &[key, Value::Int(index), Value::Text(value.to_string())])
                        .await?;
                }
                KeyType::Set | KeyType::ZSet => {
                    return Err(EngineError::unsupported(format!(
                        "updating {} members in place is not supported",
                        ty.as_str()
                    )));
                }
            }
            Ok(true)
        })
        .await
    }

    async fn delete_row(&self, config: &PluginConfig, _schema: &str, unit: &str, values: &[Record]) -> Result<bool> {
        self.run(config, "delete_row", unit, |mut conn| async move {
            let ty = require_key_type(&mut conn, unit).await?;
            let key = Value::Text(unit.to_string());
            match ty {
                KeyType::String => {
                    conn.execute("DEL", &[key]).await?;
                }
                KeyType::Hash => {
                    let field = required(values, "field", "hash deletion")?;
                    conn.execute("HDEL", &[key, Value::Text(field.to_string())]).await?;
                }
                KeyType::List => {
                    let index: i64 = required(values, "index", "list deletion")?
                        .trim()
                        .parse()
                        .map_err(|_| EngineError::validation("list index must be an integer"))?;
                    // Lists cannot drop by index: mark the slot, then remove the mark
                    let tombstone = Value::Text(LIST_TOMBSTONE.to_string());
                    conn.execute("LSET", &[key.clone(), Value::Int(index), tombstone.clone()])
                        .await?;
                    conn.execute("LREM", &[key, Value::Int(1), tombstone]).await?;
                }
                KeyType::Set | KeyType::ZSet => {
                    let member = record(values, "member")
                        .or_else(|| record(values, "value"))
                        .ok_or_else(|| {
                            EngineError::validation(format!("missing 'member' for {} deletion", ty.as_str()))
                        })?;
                    let command = if ty == KeyType::Set { "SREM" } else { "ZREM" };
                    conn.execute(command, &[key, Value::Text(member.to_string())]).await?;
                }
            }
            Ok(true)
        })
        .await
    }

    async fn clear_table_data(&self, _config: &PluginConfig, _schema: &str, _unit: &str) -> Result<bool> {
        Err(EngineError::unsupported("clearing keys is not supported for redis"))
    }

    async fn bulk_add_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        rows: &[Vec<Record>],
    ) -> Result<bool> {
        for row in rows {
            self.add_row(config, schema, unit, row).await?;
        }
        Ok(true)
    }

    async fn get_rows(
        &self,
        config: &PluginConfig,
        _schema: &str,
        unit: &str,
        request: &RowsRequest,
    ) -> Result<GetRowsResult> {
        self.run(config, "get_rows", unit, |mut conn| async move {
            let ty = require_key_type(&mut conn, unit).await?;
            let rows: Vec<Vec<String>> = load_rows(&mut conn, unit, ty)
                .await?
                .into_iter()
                .filter(|row| row_matches(ty, row, request.condition.as_ref()))
                .collect();
            let total = rows.len() as u64;
            Ok(GetRowsResult {
                columns: ty.columns(),
                rows: paginate(rows, request),
                total_count: Some(total),
                disable_update: ty == KeyType::Set,
            })
        })
        .await
    }

    async fn get_columns_for_table(&self, config: &PluginConfig, _schema: &str, unit: &str) -> Result<Vec<Column>> {
        self.run(config, "get_columns_for_table", unit, |mut conn| async move {
            Ok(require_key_type(&mut conn, unit).await?.columns())
        })
        .await
    }

    async fn get_graph(&self, _config: &PluginConfig, _schema: &str) -> Result<Vec<GraphUnit>> {
        Err(EngineError::unsupported("graph is not supported for redis"))
    }

    async fn raw_execute(&self, _config: &PluginConfig, _query: &str) -> Result<GetRowsResult> {
        Err(EngineError::unsupported("raw execution is not supported for redis"))
    }

    async fn export_data(
        &self,
        config: &PluginConfig,
        _schema: &str,
        unit: &str,
        writer: &mut dyn RowWriter,
        selected_rows: &[Vec<Record>],
    ) -> Result<()> {
        self.run(config, "export_data", unit, |mut conn| async move {
            let ty = require_key_type(&mut conn, unit).await?;
            let names = ty.column_names();
            let header: Vec<String> = names.iter().map(|n| format_header(n, "string")).collect();
            writer
                .write_row(&header)
                .map_err(|e| EngineError::query(format!("failed to write headers: {}", e)))?;

            let rows = if selected_rows.is_empty() || ty == KeyType::String {
                load_rows(&mut conn, unit, ty).await?
            } else {
                selected_rows
                    .iter()
                    .map(|row| {
                        names
                            .iter()
                            .map(|n| record(row, n).unwrap_or_default().to_string())
                            .collect()
                    })
                    .collect()
            };
            for row in rows {
                let cells: Vec<String> = row.iter().map(|c| escape_formula(c)).collect();
                writer
                    .write_row(&cells)
                    .map_err(|e| EngineError::query(format!("failed to write row: {}", e)))?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::AtomicCondition;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_key_type_layout() {
        assert_eq!(KeyType::parse("zset"), Some(KeyType::ZSet));
        assert_eq!(KeyType::parse("stream"), None);
        let names: Vec<String> = KeyType::ZSet.columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["index", "member", "score"]);
        assert_eq!(KeyType::Hash.size_command(), "HLEN");
    }

    #[test]
    fn test_pairs_drops_trailing_element() {
        let flat = row(&["a", "1", "b", "2", "c"]);
        assert_eq!(
            pairs(flat),
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_row_filtering() {
        let cond = WhereCondition::Atomic(AtomicCondition::new("field", "=", "name", "string"));
        assert!(row_matches(KeyType::Hash, &row(&["name", "x"]), Some(&cond)));
        assert!(!row_matches(KeyType::Hash, &row(&["age", "x"]), Some(&cond)));
        // lists only filter on value
        assert!(row_matches(KeyType::List, &row(&["0", "x"]), Some(&cond)));

        let cond = WhereCondition::atomic("value", ">", "m", "string");
        assert!(row_matches(KeyType::List, &row(&["0", "z"]), Some(&cond)));
        assert!(!row_matches(KeyType::List, &row(&["0", "a"]), Some(&cond)));

        let compound = WhereCondition::And(vec![cond]);
        assert!(row_matches(KeyType::List, &row(&["0", "a"]), Some(&compound)));
        assert!(!evaluate("a", "LIKE", "a"));
    }

    #[test]
    fn test_paginate() {
        let rows: Vec<Vec<String>> = (0..5).map(|i| vec![i.to_string()]).collect();
        let page = paginate(rows.clone(), &RowsRequest::page(2, 1));
        assert_eq!(page, vec![vec!["1".to_string()], vec!["2".to_string()]]);
        assert_eq!(paginate(rows, &RowsRequest::page(0, 3)).len(), 2);
    }
}
