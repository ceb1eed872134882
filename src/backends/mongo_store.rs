//! Document-store plugin for MongoDB
//!
//! Schemas are databases and storage units are collections. Reads return a
//! single `document` column holding each document as JSON. Writes take either
//! field records, coerced by their declared type, or one `document` record
//! holding a JSON object.
//!
//! Relationships are not declared in MongoDB, so columns and graph edges come
//! from naming convention: a field `user_id` or `userId` refers to `users`.

use crate::backends::pooled_mongodb::{decode_document, encode_document, reply_count, FALLBACK_DATABASE};
use crate::core::classifier::ErrorClassifier;
use crate::core::config::PluginConfig;
use crate::core::connection::NativeConnection;
use crate::core::database_types::DatabaseType;
use crate::core::error::{EngineError, Result};
use crate::core::manager::{ConnectionHandle, ConnectionManager};
use crate::core::model::{
    Column, ForeignKeyRelationship, GetRowsResult, GraphUnit, GraphUnitRelationship, ImportMode, ImportOptions,
    ImportResult, Record, RelationshipType, SortCondition, SortDirection, StorageUnit, WhereCondition,
};
use crate::core::plugin::{escape_formula, format_header, parse_header, Plugin, RowReader, RowWriter, RowsRequest};
use crate::core::value::Value;
use ::mongodb::bson::oid::ObjectId;
use ::mongodb::bson::{doc, Bson, DateTime, Document};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Documents read to discover fields and references
const SAMPLE_SIZE: u64 = 100;
/// Documents per `insert` command
const INSERT_BATCH: usize = 1000;
const DOCUMENT_FIELD: &str = "document";
const ID_FIELD: &str = "_id";
/// Header type written on export; carries no conversion hint on import
const EXPORT_TYPE: &str = "BSON";

/// MongoDB plugin over the shared [`ConnectionManager`]
pub struct MongoPlugin {
    manager: Arc<ConnectionManager>,
    classifier: ErrorClassifier,
}

impl MongoPlugin {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            classifier: ErrorClassifier::new(DatabaseType::MongoDb),
        }
    }

    async fn run<T, F, Fut>(&self, config: &PluginConfig, operation: &str, collection: &str, f: F) -> Result<T>
    where
        F: FnOnce(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.manager
            .with_connection(config, f)
            .await
            .map_err(|e| {
                self.classifier
                    .classify(e, operation, &[("collection", collection.to_string())])
            })
    }
}

fn command_params(database: &str, command: &Document) -> Result<Vec<Value>> {
    Ok(vec![
        Value::Text(database.to_string()),
        Value::Bytes(encode_document(command)?),
    ])
}

/// Run a command and decode every document it returns.
///
/// The command name is the document's first key.
async fn documents(conn: &mut dyn NativeConnection, database: &str, command: Document) -> Result<Vec<Document>> {
    let name = command.keys().next().cloned().unwrap_or_default();
    let result = conn.query(&name, &command_params(database, &command)?).await?;
    result
        .rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .map(|cell| match cell {
            Value::Bytes(raw) => decode_document(&raw),
            other => Err(EngineError::query(format!(
                "unexpected MongoDB reply: {}",
                other.to_display_string()
            ))),
        })
        .collect()
}

async fn reply(conn: &mut dyn NativeConnection, database: &str, command: Document) -> Result<Document> {
    documents(conn, database, command)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::query("MongoDB returned no reply"))
}

async fn insert_many(
    conn: &mut dyn NativeConnection,
    database: &str,
    collection: &str,
    batch: Vec<Document>,
) -> Result<u64> {
    let reply = reply(conn, database, doc! { "insert": collection, "documents": batch, "ordered": true }).await?;
    Ok(reply_count(&reply, "n"))
}

/// `listCollections` entries, without `system.*`
async fn collections(conn: &mut dyn NativeConnection, database: &str) -> Result<Vec<Document>> {
    Ok(documents(conn, database, doc! { "listCollections": 1 })
        .await?
        .into_iter()
        .filter(|info| matches!(info.get_str("name"), Ok(name) if !name.starts_with("system.")))
        .collect())
}

fn collection_names(infos: &[Document]) -> Vec<String> {
    infos
        .iter()
        .filter_map(|info| info.get_str("name").ok().map(str::to_string))
        .collect()
}

fn is_view(info: &Document) -> bool {
    matches!(info.get_str("type"), Ok("view"))
}

async fn collection_exists(conn: &mut dyn NativeConnection, database: &str, collection: &str) -> Result<bool> {
    let found = documents(
        conn,
        database,
        doc! { "listCollections": 1, "filter": { "name": collection }, "nameOnly": true },
    )
    .await?;
    Ok(!found.is_empty())
}

fn find_command(collection: &str, filter: Document, sort: Document, skip: u64, limit: u64) -> Document {
    let mut command = doc! { "find": collection, "filter": filter };
    if !sort.is_empty() {
        command.insert("sort", sort);
    }
    if skip > 0 {
        command.insert("skip", skip as i64);
    }
    if limit > 0 {
        command.insert("limit", limit as i64);
    }
    command
}

fn database_names(reply: &Document) -> Vec<String> {
    reply
        .get_array("databases")
        .map(|dbs| {
            dbs.iter()
                .filter_map(|db| db.as_document()?.get_str("name").ok().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Filter operator for a condition's operator, in either spelling
fn mongo_operator(operator: &str) -> Result<&'static str> {
    Ok(match operator.trim().to_lowercase().as_str() {
        "eq" | "=" | "==" => "$eq",
        "ne" | "!=" | "<>" => "$ne",
        "gt" | ">" => "$gt",
        "gte" | ">=" => "$gte",
        "lt" | "<" => "$lt",
        "lte" | "<=" => "$lte",
        "in" => "$in",
        "nin" | "not in" => "$nin",
        _ => return Err(EngineError::validation(format!("unsupported operator: {}", operator))),
    })
}

/// Translate a condition tree into a query filter.
///
/// Values are coerced by the leaf's column type; `in`/`nin` take a comma
/// separated list. Empty `And`/`Or` nodes match everything.
pub fn filter_from_condition(condition: &WhereCondition) -> Result<Document> {
    match condition {
        WhereCondition::Atomic(atomic) => {
            let operator = mongo_operator(&atomic.operator)?;
            let hint = Some(atomic.column_type.as_str()).filter(|t| !t.trim().is_empty());
            let value = if matches!(operator, "$in" | "$nin") {
                Bson::Array(
                    atomic
                        .value
                        .split(',')
                        .map(|item| coerce_value(&atomic.key, item.trim(), hint))
                        .collect::<Result<Vec<_>>>()?,
                )
            } else {
                coerce_value(&atomic.key, &atomic.value, hint)?
            };
            let mut clause = Document::new();
            clause.insert(operator, value);
            let mut filter = Document::new();
            filter.insert(atomic.key.clone(), clause);
            Ok(filter)
        }
        WhereCondition::And(children) => combine("$and", children),
        WhereCondition::Or(children) => combine("$or", children),
    }
}

fn combine(operator: &str, children: &[WhereCondition]) -> Result<Document> {
    if children.is_empty() {
        return Ok(Document::new());
    }
    let clauses = children
        .iter()
        .map(|child| filter_from_condition(child).map(Bson::Document))
        .collect::<Result<Vec<_>>>()?;
    let mut filter = Document::new();
    filter.insert(operator, clauses);
    Ok(filter)
}

pub fn sort_document(sort: &[SortCondition]) -> Document {
    sort.iter()
        .map(|s| {
            let direction = match s.direction {
                SortDirection::Ascending => 1,
                SortDirection::Descending => -1,
            };
            (s.column.clone(), Bson::Int32(direction))
        })
        .collect()
}

/// Convert a text cell into a BSON value.
///
/// `_id` holding a valid ObjectId hex string always becomes an ObjectId. A
/// known `hint` (`double`, `int`, `long`, `bool`, `string`, `date`,
/// `objectid`) must parse; anything else is inferred.
pub fn coerce_value(key: &str, raw: &str, hint: Option<&str>) -> Result<Bson> {
    let trimmed = raw.trim();
    if key == ID_FIELD {
        if let Ok(oid) = ObjectId::parse_str(trimmed) {
            return Ok(Bson::ObjectId(oid));
        }
    }
    let invalid = |target: &str, reason: String| EngineError::conversion(raw, target, reason);
    match hint.map(str::to_lowercase).as_deref() {
        Some("double") => trimmed
            .parse::<f64>()
            .map(Bson::Double)
            .map_err(|e| invalid("double", e.to_string())),
        Some("int") => trimmed
            .parse::<i32>()
            .map(Bson::Int32)
            .map_err(|e| invalid("int", e.to_string())),
        Some("long") => trimmed
            .parse::<i64>()
            .map(Bson::Int64)
            .map_err(|e| invalid("long", e.to_string())),
        Some("bool") => match trimmed.to_lowercase().as_str() {
            "true" | "1" => Ok(Bson::Boolean(true)),
            "false" | "0" => Ok(Bson::Boolean(false)),
            _ => Err(invalid("bool", "expected true or false".to_string())),
        },
        Some("string") => Ok(Bson::String(raw.to_string())),
        Some("date") => DateTime::parse_rfc3339_str(trimmed)
            .map(Bson::DateTime)
            .map_err(|e| invalid("date", e.to_string())),
        Some("objectid") => ObjectId::parse_str(trimmed)
            .map(Bson::ObjectId)
            .map_err(|e| invalid("objectid", e.to_string())),
        _ => Ok(infer_value(raw)),
    }
}

/// Booleans, then integers, then finite floats, then embedded JSON
/// objects or arrays; otherwise the text itself
fn infer_value(raw: &str) -> Bson {
    match raw {
        "true" => return Bson::Boolean(true),
        "false" => return Bson::Boolean(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Bson::Int64(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Bson::Double(f);
        }
    }
    if raw.starts_with('{') || raw.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw) {
            if let Ok(bson) = Bson::try_from(parsed) {
                return bson;
            }
        }
    }
    Bson::String(raw.to_string())
}

/// Parse a JSON object into a document, turning a hex `_id` into an ObjectId
fn parse_document(json: &str) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let mut document = match Bson::try_from(value) {
        Ok(Bson::Document(document)) => document,
        Ok(_) => return Err(EngineError::validation("document must be a JSON object")),
        Err(e) => return Err(EngineError::validation(format!("invalid document: {}", e))),
    };
    let oid = match document.get(ID_FIELD) {
        Some(Bson::String(id)) => ObjectId::parse_str(id).ok(),
        _ => None,
    };
    if let Some(oid) = oid {
        document.insert(ID_FIELD, oid);
    }
    Ok(document)
}

fn document_from_records(values: &[Record]) -> Result<Document> {
    if let [single] = values {
        if single.key == DOCUMENT_FIELD {
            return parse_document(&single.value);
        }
    }
    let mut document = Document::new();
    for r in values {
        let value = if r.is_null() {
            Bson::Null
        } else {
            coerce_value(&r.key, &r.value, r.declared_type())?
        };
        document.insert(r.key.clone(), value);
    }
    Ok(document)
}

fn record<'a>(values: &'a [Record], key: &str) -> Option<&'a str> {
    values.iter().find(|r| r.key == key).map(|r| r.value.as_str())
}

fn required<'a>(values: &'a [Record], key: &str, purpose: &str) -> Result<&'a str> {
    record(values, key).ok_or_else(|| EngineError::validation(format!("missing '{}' for {}", key, purpose)))
}

fn rfc3339(dt: DateTime) -> String {
    dt.try_to_rfc3339_string()
        .unwrap_or_else(|_| dt.timestamp_millis().to_string())
}

/// JSON display form: ObjectIds as hex, dates as RFC 3339
pub fn display_json(value: &Bson) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        Bson::ObjectId(oid) => J::String(oid.to_hex()),
        Bson::DateTime(dt) => J::String(rfc3339(*dt)),
        Bson::Document(document) => object_json(document),
        Bson::Array(items) => J::Array(items.iter().map(display_json).collect()),
        Bson::String(s) => J::String(s.clone()),
        Bson::Boolean(b) => J::Bool(*b),
        Bson::Int32(n) => J::from(*n),
        Bson::Int64(n) => J::from(*n),
        Bson::Double(f) => serde_json::Number::from_f64(*f).map(J::Number).unwrap_or(J::Null),
        Bson::Null => J::Null,
        other => other.clone().into_relaxed_extjson(),
    }
}

fn object_json(document: &Document) -> serde_json::Value {
    serde_json::Value::Object(
        document
            .iter()
            .map(|(k, v)| (k.clone(), display_json(v)))
            .collect(),
    )
}

/// Flat text form used in exports and attributes
pub fn format_bson(value: &Bson) -> String {
    match value {
        Bson::Null => String::new(),
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => rfc3339(*dt),
        Bson::Boolean(b) => b.to_string(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(f) => f.to_string(),
        other => display_json(other).to_string(),
    }
}

/// Reported type of a sampled field
pub fn infer_type(value: &Bson) -> &'static str {
    match value {
        Bson::ObjectId(_) => "ObjectId",
        Bson::String(_) => "string",
        Bson::Int32(_) | Bson::Int64(_) => "int",
        Bson::Double(_) | Bson::Decimal128(_) => "double",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) | Bson::Timestamp(_) => "date",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Null => "null",
        _ => "mixed",
    }
}

fn singular(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = name.strip_suffix('s') {
        stem.to_string()
    } else {
        name.to_string()
    }
}

fn plural(name: &str) -> String {
    if name.ends_with('s') {
        name.to_string()
    } else if let Some(stem) = name.strip_suffix('y') {
        format!("{}ies", stem)
    } else {
        format!("{}s", name)
    }
}

/// Collection another collection's field refers to by name.
///
/// `user_id`, `userId`, `users_id` and `usersid` all refer to `users`; a
/// collection never refers to itself.
pub fn reference_for<'a>(field: &str, collections: &'a [String], own: &str) -> Option<&'a str> {
    let field = field.to_lowercase();
    if field == ID_FIELD {
        return None;
    }
    collections
        .iter()
        .filter(|c| c.as_str() != own)
        .find(|c| {
            let name = c.to_lowercase();
            [singular(&name), plural(&name), name]
                .iter()
                .any(|stem| field == format!("{}_id", stem) || field == format!("{}id", stem))
        })
        .map(String::as_str)
}

/// Export columns: `_id` first, then fields in first-seen order
pub fn export_fields(sample: &[Document]) -> Vec<String> {
    let mut fields = vec![ID_FIELD.to_string()];
    for document in sample {
        for key in document.keys() {
            if !fields.contains(key) {
                fields.push(key.clone());
            }
        }
    }
    fields
}

/// Build one imported document; empty cells are left out
fn import_document(columns: &[(String, Option<String>)], row: &[String]) -> Result<Document> {
    if row.len() != columns.len() {
        return Err(EngineError::validation(format!(
            "row has {} values but the header has {} columns",
            row.len(),
            columns.len()
        )));
    }
    let mut document = Document::new();
    for ((name, hint), cell) in columns.iter().zip(row) {
        if cell.is_empty() {
            continue;
        }
        document.insert(name.clone(), coerce_value(name, cell, hint.as_deref())?);
    }
    Ok(document)
}

/// Insert the pending batch; with `skip_errors` a failed batch counts as skipped
async fn flush(
    conn: &mut dyn NativeConnection,
    database: &str,
    collection: &str,
    batch: &mut Vec<Document>,
    skip_errors: bool,
    result: &mut ImportResult,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let pending = std::mem::take(batch);
    let count = pending.len() as u64;
    match insert_many(conn, database, collection, pending).await {
        Ok(_) => result.imported += count,
        Err(e) if skip_errors => {
            warn!(target: "mongodb", collection, rows = count, error = %e, "Skipping failed import batch");
            result.skipped += count;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

#[async_trait]
impl Plugin for MongoPlugin {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDb
    }

    async fn is_available(&self, config: &PluginConfig) -> bool {
        match self
            .run(config, "is_available", "", |mut conn| async move { conn.ping().await })
            .await
        {
            Ok(()) => true,
            Err(e) => {
                debug!(target: "mongodb", error = %e, "MongoDB is not available");
                false
            }
        }
    }

    async fn get_databases(&self, config: &PluginConfig) -> Result<Vec<String>> {
        self.run(config, "get_databases", "", |mut conn| async move {
            let listing = reply(
                &mut conn,
                FALLBACK_DATABASE,
                doc! { "listDatabases": 1, "nameOnly": true },
            )
            .await?;
            Ok(database_names(&listing))
        })
        .await
    }

    async fn get_all_schemas(&self, config: &PluginConfig) -> Result<Vec<String>> {
        self.get_databases(config).await
    }

    async fn get_storage_units(&self, config: &PluginConfig, schema: &str) -> Result<Vec<StorageUnit>> {
        self.run(config, "get_storage_units", schema, |mut conn| async move {
            let mut units = Vec::new();
            for info in collections(&mut conn, schema).await? {
                let Ok(name) = info.get_str("name") else {
                    continue;
                };
                let attributes = if is_view(&info) {
                    let view_on = info
                        .get_document("options")
                        .ok()
                        .and_then(|o| o.get_str("viewOn").ok())
                        .unwrap_or_default();
                    vec![Record::new("Type", "View"), Record::new("View On", view_on)]
                } else {
                    let mut attributes = vec![Record::new("Type", "Collection")];
                    match reply(&mut conn, schema, doc! { "collStats": name }).await {
                        Ok(stats) => {
                            let stat = |key: &str| stats.get(key).map(format_bson).unwrap_or_default();
                            attributes.push(Record::new("Storage Size", stat("storageSize")));
                            attributes.push(Record::new("Count", stat("count")));
                        }
                        Err(e) => {
                            warn!(target: "mongodb", collection = name, error = %e, "collStats failed, listing without size");
                        }
                    }
                    attributes
                };
                units.push(StorageUnit {
                    name: name.to_string(),
                    attributes,
                });
            }
            Ok(units)
        })
        .await
    }

    async fn storage_unit_exists(&self, config: &PluginConfig, schema: &str, unit: &str) -> Result<bool> {
        self.run(config, "storage_unit_exists", unit, |mut conn| async move {
            collection_exists(&mut conn, schema, unit).await
        })
        .await
    }

    /// Create an empty collection; fields are ignored since collections carry no schema
    async fn add_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        _fields: &[Record],
    ) -> Result<bool> {
        self.run(config, "add_storage_unit", unit, |mut conn| async move {
            if collection_exists(&mut conn, schema, unit).await? {
                return Err(EngineError::validation(format!("collection already exists: {}", unit)));
            }
            reply(&mut conn, schema, doc! { "create": unit }).await?;
            debug!(target: "mongodb", database = schema, collection = unit, "Created collection");
            Ok(true)
        })
        .await
    }

    async fn add_row(&self, config: &PluginConfig, schema: &str, unit: &str, values: &[Record]) -> Result<bool> {
        if values.is_empty() {
            return Err(EngineError::validation("no values provided to insert into the collection"));
        }
        let document = document_from_records(values)?;
        self.run(config, "add_row", unit, |mut conn| async move {
            insert_many(&mut conn, schema, unit, vec![document]).await?;
            Ok(true)
        })
        .await
    }

    /// Set fields of the document in the `document` record, matched by its `_id`.
    ///
    /// With `updated_columns` only those fields are written.
    async fn update_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        values: &[Record],
        updated_columns: &[String],
    ) -> Result<bool> {
        let mut document = parse_document(required(values, DOCUMENT_FIELD, "document update")?)?;
        let id = document
            .remove(ID_FIELD)
            .ok_or_else(|| EngineError::validation("document update requires an '_id' field"))?;
        let changes: Document = if updated_columns.is_empty() {
            document
        } else {
            document
                .into_iter()
                .filter(|(k, _)| updated_columns.contains(k))
                .collect()
        };
        if changes.is_empty() {
            return Err(EngineError::validation("no fields to update"));
        }

        self.run(config, "update_row", unit, |mut conn| async move {
            let command = doc! {
                "update": unit,
                "updates": [{ "q": { "_id": id }, "u": { "$set": changes }, "multi": false }],
            };
            let outcome = reply(&mut conn, schema, command).await?;
            if reply_count(&outcome, "n") == 0 {
                return Err(EngineError::not_found("no documents matched the filter"));
            }
            if reply_count(&outcome, "nModified") == 0 {
                return Err(EngineError::not_found("no documents were updated"));
            }
            Ok(true)
        })
        .await
    }

    /// Delete one document by `_id`, given directly or inside a `document` record
    async fn delete_row(&self, config: &PluginConfig, schema: &str, unit: &str, values: &[Record]) -> Result<bool> {
        let id = match record(values, ID_FIELD) {
            Some(raw) => coerce_value(ID_FIELD, raw, None)?,
            None => parse_document(required(values, DOCUMENT_FIELD, "document deletion")?)?
                .remove(ID_FIELD)
                .ok_or_else(|| EngineError::validation("document deletion requires an '_id' field"))?,
        };
        self.run(config, "delete_row", unit, |mut conn| async move {
            let command = doc! { "delete": unit, "deletes": [{ "q": { "_id": id }, "limit": 1 }] };
            if reply_count(&reply(&mut conn, schema, command).await?, "n") == 0 {
                return Err(EngineError::not_found("no documents were deleted"));
            }
            Ok(true)
        })
        .await
    }

    async fn clear_table_data(&self, _config: &PluginConfig, _schema: &str, _unit: &str) -> Result<bool> {
        Err(EngineError::unsupported("clearing collections is not supported for mongodb"))
    }

    async fn bulk_add_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        rows: &[Vec<Record>],
    ) -> Result<bool> {
        let pending = rows
            .iter()
            .map(|row| document_from_records(row))
            .collect::<Result<Vec<_>>>()?;
        if pending.is_empty() {
            return Ok(true);
        }
        self.run(config, "bulk_add_rows", unit, |mut conn| async move {
            let mut inserted = 0;
            for chunk in pending.chunks(INSERT_BATCH) {
                inserted += insert_many(&mut conn, schema, unit, chunk.to_vec()).await?;
            }
            debug!(target: "mongodb", collection = unit, inserted, "Bulk insert finished");
            Ok(true)
        })
        .await
    }

    /// One page of documents; the total comes from a concurrent `count`
    async fn get_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        request: &RowsRequest,
    ) -> Result<GetRowsResult> {
        let filter = match &request.condition {
            Some(condition) => filter_from_condition(condition)?,
            None => Document::new(),
        };
        let count = doc! { "count": unit, "query": filter.clone() };
        let find = find_command(
            unit,
            filter,
            sort_document(&request.sort),
            request.page_offset,
            request.page_size,
        );

        let (counted, found) = tokio::join!(
            self.run(config, "get_rows", unit, |mut conn| async move {
                reply(&mut conn, schema, count).await
            }),
            self.run(config, "get_rows", unit, |mut conn| async move {
                documents(&mut conn, schema, find).await
            }),
        );
        let total_count = match counted {
            Ok(outcome) => Some(reply_count(&outcome, "n")),
            Err(e) => {
                warn!(target: "mongodb", collection = unit, error = %e, "Count failed, returning rows without a total");
                None
            }
        };
        let rows = found?
            .iter()
            .map(|document| vec![object_json(document).to_string()])
            .collect();
        Ok(GetRowsResult {
            columns: vec![Column::new(DOCUMENT_FIELD, "Document")],
            rows,
            total_count,
            disable_update: false,
        })
    }

    /// Fields of one sampled document; `_id` is the primary key
    async fn get_columns_for_table(&self, config: &PluginConfig, schema: &str, unit: &str) -> Result<Vec<Column>> {
        self.run(config, "get_columns_for_table", unit, |mut conn| async move {
            let sample = documents(
                &mut conn,
                schema,
                find_command(unit, Document::new(), Document::new(), 0, 1),
            )
            .await?;
            let Some(first) = sample.into_iter().next() else {
                return Ok(Vec::new());
            };
            let names = collection_names(&collections(&mut conn, schema).await?);
            Ok(first
                .iter()
                .map(|(field, value)| {
                    let mut column = Column::new(field.clone(), infer_type(value));
                    column.is_primary = field == ID_FIELD;
                    if let Some(target) = reference_for(field, &names, unit) {
                        column.is_foreign_key = true;
                        column.referenced_table = Some(target.to_string());
                        column.referenced_column = Some(ID_FIELD.to_string());
                    }
                    column
                })
                .collect())
        })
        .await
    }

    async fn get_foreign_key_relationships(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
    ) -> Result<HashMap<String, ForeignKeyRelationship>> {
        Ok(self
            .get_columns_for_table(config, schema, unit)
            .await?
            .into_iter()
            .filter_map(|c| {
                Some((
                    c.name.clone(),
                    ForeignKeyRelationship {
                        column_name: c.name,
                        referenced_table: c.referenced_table?,
                        referenced_column: c.referenced_column?,
                    },
                ))
            })
            .collect())
    }

    /// Collections with edges inferred from sampled field names
    async fn get_graph(&self, config: &PluginConfig, schema: &str) -> Result<Vec<GraphUnit>> {
        self.run(config, "get_graph", schema, |mut conn| async move {
            let infos = collections(&mut conn, schema).await?;
            let names = collection_names(&infos);
            let mut graph = Vec::with_capacity(infos.len());
            for info in &infos {
                let Ok(name) = info.get_str("name") else {
                    continue;
                };
                let view = is_view(info);
                let mut relations: Vec<GraphUnitRelationship> = Vec::new();
                if !view {
                    let sample = documents(
                        &mut conn,
                        schema,
                        find_command(name, Document::new(), Document::new(), 0, SAMPLE_SIZE),
                    )
                    .await?;
                    for field in export_fields(&sample) {
                        if let Some(target) = reference_for(&field, &names, name) {
                            if !relations.iter().any(|r| r.name == target) {
                                relations.push(GraphUnitRelationship {
                                    name: target.to_string(),
                                    relationship_type: RelationshipType::ManyToOne,
                                });
                            }
                        }
                    }
                }
                graph.push(GraphUnit {
                    unit: StorageUnit {
                        name: name.to_string(),
                        attributes: vec![Record::new("Type", if view { "View" } else { "Collection" })],
                    },
                    relations,
                });
            }
            Ok(graph)
        })
        .await
    }

    async fn raw_execute(&self, _config: &PluginConfig, _query: &str) -> Result<GetRowsResult> {
        Err(EngineError::unsupported("raw execution is not supported for mongodb"))
    }

    async fn export_data(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        writer: &mut dyn RowWriter,
        selected_rows: &[Vec<Record>],
    ) -> Result<()> {
        if !selected_rows.is_empty() {
            return Err(EngineError::unsupported("exporting selected rows is not supported for MongoDB"));
        }
        self.run(config, "export_data", unit, |mut conn| async move {
            let sample = documents(
                &mut conn,
                schema,
                find_command(unit, Document::new(), Document::new(), 0, SAMPLE_SIZE),
            )
            .await?;
            let fields = export_fields(&sample);
            let header: Vec<String> = fields.iter().map(|f| format_header(f, EXPORT_TYPE)).collect();
            writer
                .write_row(&header)
                .map_err(|e| EngineError::query(format!("failed to write headers: {}", e)))?;

            let all = documents(
                &mut conn,
                schema,
                find_command(unit, Document::new(), doc! { "_id": 1 }, 0, 0),
            )
            .await?;
            for document in &all {
                let cells: Vec<String> = fields
                    .iter()
                    .map(|f| escape_formula(&document.get(f).map(format_bson).unwrap_or_default()))
                    .collect();
                writer
                    .write_row(&cells)
                    .map_err(|e| EngineError::query(format!("failed to write row: {}", e)))?;
            }
            debug!(target: "mongodb", collection = unit, rows = all.len(), "Export finished");
            Ok(())
        })
        .await
    }

    /// Insert streamed rows in batches; `Overwrite` drops the collection first
    async fn import_data(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        reader: &mut dyn RowReader,
        options: &ImportOptions,
    ) -> Result<ImportResult> {
        let header = reader
            .read_row()?
            .ok_or_else(|| EngineError::validation("import has no header row"))?;
        let columns: Vec<(String, Option<String>)> = header
            .iter()
            .map(|cell| {
                let (name, ty) = parse_header(cell);
                (name, ty.filter(|t| !t.eq_ignore_ascii_case(EXPORT_TYPE)))
            })
            .collect();
        if columns.iter().any(|(name, _)| name.is_empty()) {
            return Err(EngineError::validation("import header has an empty column name"));
        }
        let mode = options.mode;
        let skip_errors = options.skip_errors;

        self.run(config, "import_data", unit, |mut conn| async move {
            if mode == ImportMode::Overwrite && collection_exists(&mut conn, schema, unit).await? {
                reply(&mut conn, schema, doc! { "drop": unit }).await?;
                debug!(target: "mongodb", collection = unit, "Dropped collection before import");
            }
            let mut result = ImportResult::default();
            let mut batch = Vec::with_capacity(INSERT_BATCH);
            while let Some(row) = reader.read_row()? {
                match import_document(&columns, &row) {
                    Ok(document) => batch.push(document),
                    Err(e) if skip_errors => {
                        warn!(target: "mongodb", collection = unit, error = %e, "Skipping import row");
                        result.skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
                if batch.len() >= INSERT_BATCH {
                    flush(&mut conn, schema, unit, &mut batch, skip_errors, &mut result).await?;
                }
            }
            flush(&mut conn, schema, unit, &mut batch, skip_errors, &mut result).await?;
            Ok(result)
        })
        .await
    }
}
