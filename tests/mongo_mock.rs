//! Document plugin behaviour against a scripted command server
//!
//! The mock decodes every BSON command it receives, records it and answers
//! from a fixed `shop` database holding `users`, `orders` and one view.

#![cfg(feature = "mongodb_support")]

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, DateTime, Document};
use parking_lot::Mutex;
use rust_dialect_engine::backends::pooled_mongodb::{decode_document, encode_document};
use rust_dialect_engine::backends::MongoPlugin;
use rust_dialect_engine::core::config::ResolvedConnection;
use rust_dialect_engine::core::connection::{ColumnMeta, ConnectionPool, PoolStats};
use rust_dialect_engine::core::*;
use std::sync::{Arc, Once};

const USER: &str = "65f1a2b3c4d5e6f708192a3b";

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
struct Server {
    /// `(database, command)` in arrival order
    calls: Mutex<Vec<(String, Document)>>,
    /// `n` reported by update and delete
    matched: Mutex<i32>,
}

impl Server {
    fn commands(&self, name: &str) -> Vec<Document> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, c)| c.keys().next().map(String::as_str) == Some(name))
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn names(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|(_, c)| c.keys().next().cloned())
            .collect()
    }

    fn answer(&self, database: &str, command: Document) -> Result<Vec<Document>> {
        self.calls.lock().push((database.to_string(), command.clone()));
        let user = ObjectId::parse_str(USER).unwrap();
        let name = command.keys().next().cloned().unwrap_or_default();
        Ok(match name.as_str() {
            "listCollections" => {
                let all = vec![
                    doc! { "name": "users", "type": "collection" },
                    doc! { "name": "orders", "type": "collection" },
                    doc! { "name": "active_users", "type": "view", "options": { "viewOn": "users" } },
                    doc! { "name": "system.views", "type": "collection" },
                ];
                match command.get_document("filter").ok().and_then(|f| f.get_str("name").ok()) {
                    Some(wanted) => all
                        .into_iter()
                        .filter(|c| matches!(c.get_str("name"), Ok(n) if n == wanted))
                        .collect(),
                    None => all,
                }
            }
            "collStats" if matches!(command.get_str("collStats"), Ok("orders")) => {
                return Err(EngineError::unsupported("collStats is disabled for orders"));
            }
            "collStats" => vec![doc! { "storageSize": 4096, "count": 2_i64, "ok": 1.0 }],
            "find" => match command.get_str("find") {
                Ok("orders") => vec![doc! { "_id": ObjectId::new(), "user_id": user, "total": 9.5 }],
                _ => vec![
                    doc! { "_id": user, "name": "Alice", "age": 31 },
                    doc! { "_id": ObjectId::new(), "name": "Bob", "joined": DateTime::from_millis(0) },
                ],
            },
            "count" => vec![doc! { "n": 2, "ok": 1.0 }],
            "insert" => {
                let n = command.get_array("documents").map(|d| d.len() as i32).unwrap_or(0);
                vec![doc! { "n": n, "ok": 1.0 }]
            }
            "update" => {
                let n = *self.matched.lock();
                vec![doc! { "n": n, "nModified": n, "ok": 1.0 }]
            }
            "delete" => vec![doc! { "n": *self.matched.lock(), "ok": 1.0 }],
            "listDatabases" => vec![doc! { "databases": [{ "name": "admin" }, { "name": "shop" }], "ok": 1.0 }],
            _ => vec![doc! { "ok": 1.0 }],
        })
    }
}

struct ScriptedConnection {
    server: Arc<Server>,
}

impl ScriptedConnection {
    fn call(&self, params: &[Value]) -> Result<Vec<Document>> {
        let database = match params.first() {
            Some(Value::Text(db)) => db.clone(),
            _ => String::new(),
        };
        let command = match params.get(1) {
            Some(Value::Bytes(raw)) => decode_document(raw)?,
            _ => return Err(EngineError::validation("missing command document")),
        };
        self.server.answer(&database, command)
    }
}

#[async_trait]
impl NativeConnection for ScriptedConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDb
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn execute(&mut self, _sql: &str, params: &[Value]) -> Result<u64> {
        let replies = self.call(params)?;
        Ok(replies.first().and_then(|r| r.get_i32("n").ok()).unwrap_or(0) as u64)
    }

    async fn query(&mut self, _sql: &str, params: &[Value]) -> Result<QueryResult> {
        let rows = self
            .call(params)?
            .iter()
            .map(|d| encode_document(d).map(|raw| vec![Value::Bytes(raw)]))
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult {
            columns: vec![ColumnMeta::new("document", "BSON")],
            rows,
        })
    }

    async fn begin(&mut self) -> Result<()> {
        Err(EngineError::unsupported("no transactions"))
    }

    async fn commit(&mut self) -> Result<()> {
        Err(EngineError::unsupported("no transactions"))
    }

    async fn rollback(&mut self) -> Result<()> {
        Err(EngineError::unsupported("no transactions"))
    }

    fn in_transaction(&self) -> bool {
        false
    }
}

struct ScriptedPool {
    server: Arc<Server>,
}

#[async_trait]
impl ConnectionPool for ScriptedPool {
    async fn acquire(&self) -> Result<Box<dyn NativeConnection>> {
        Ok(Box::new(ScriptedConnection {
            server: Arc::clone(&self.server),
        }))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: 1,
            available: 1,
            waiting: 0,
        }
    }

    fn close(&self) {}
}

struct ScriptedConnector {
    server: Arc<Server>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDb
    }

    async fn connect(
        &self,
        _config: &ResolvedConnection,
        _options: &PoolOptions,
    ) -> Result<Arc<dyn ConnectionPool>> {
        Ok(Arc::new(ScriptedPool {
            server: Arc::clone(&self.server),
        }))
    }
}

fn setup() -> (MongoPlugin, PluginConfig, Arc<Server>) {
    init_tracing();
    let server = Arc::new(Server::default());
    let manager = ConnectionManager::new(PoolOptions::default()).with_connector(Arc::new(ScriptedConnector {
        server: Arc::clone(&server),
    }));
    let plugin = MongoPlugin::new(Arc::new(manager));
    let config = PluginConfig::new(
        ConnectionConfig::new(DatabaseType::MongoDb)
            .with_host("mock")
            .with_database("shop"),
    );
    (plugin, config, server)
}

#[tokio::test]
async fn test_databases_and_schemas() {
    let (plugin, config, _server) = setup();
    assert_eq!(plugin.get_databases(&config).await.unwrap(), vec!["admin", "shop"]);
    assert_eq!(plugin.get_all_schemas(&config).await.unwrap(), vec!["admin", "shop"]);
    assert!(plugin.is_available(&config).await);
}

#[tokio::test]
async fn test_storage_units_skip_system_collections() {
    let (plugin, config, _server) = setup();
    let units = plugin.get_storage_units(&config, "shop").await.unwrap();
    let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["users", "orders", "active_users"]);

    assert_eq!(units[0].attribute("Type"), Some("Collection"));
    assert_eq!(units[0].attribute("Storage Size"), Some("4096"));
    assert_eq!(units[0].attribute("Count"), Some("2"));
    // a failed collStats still lists the collection
    assert_eq!(units[1].attribute("Type"), Some("Collection"));
    assert_eq!(units[1].attribute("Count"), None);
    assert_eq!(units[2].attribute("Type"), Some("View"));
    assert_eq!(units[2].attribute("View On"), Some("users"));

    assert!(plugin.storage_unit_exists(&config, "shop", "orders").await.unwrap());
    assert!(!plugin.storage_unit_exists(&config, "shop", "invoices").await.unwrap());
}

#[tokio::test]
async fn test_add_storage_unit_rejects_existing_collection() {
    let (plugin, config, server) = setup();
    let err = plugin.add_storage_unit(&config, "shop", "users", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(server.commands("create").is_empty());

    assert!(plugin.add_storage_unit(&config, "shop", "invoices", &[]).await.unwrap());
    assert_eq!(server.commands("create")[0].get_str("create").unwrap(), "invoices");
}

#[tokio::test]
async fn test_get_rows_sends_filter_sort_and_page() {
    let (plugin, config, server) = setup();
    let request = RowsRequest::page(10, 20)
        .with_condition(WhereCondition::atomic("age", ">", "30", "int"))
        .with_sort(vec![SortCondition::desc("age")]);
    let result = plugin.get_rows(&config, "shop", "users", &request).await.unwrap();

    assert_eq!(result.total_count, Some(2));
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.columns[0].name, "document");
    assert_eq!(result.rows.len(), 2);
    let first: serde_json::Value = serde_json::from_str(&result.rows[0][0]).unwrap();
    assert_eq!(first["_id"], serde_json::json!(USER));
    assert_eq!(first["age"], serde_json::json!(31));
    let second: serde_json::Value = serde_json::from_str(&result.rows[1][0]).unwrap();
    assert_eq!(second["joined"], serde_json::json!("1970-01-01T00:00:00Z"));

    let find = &server.commands("find")[0];
    assert_eq!(find.get_document("filter").unwrap(), &doc! { "age": { "$gt": 30 } });
    assert_eq!(find.get_document("sort").unwrap(), &doc! { "age": -1 });
    assert_eq!(find.get_i64("skip").unwrap(), 20);
    assert_eq!(find.get_i64("limit").unwrap(), 10);
    let count = &server.commands("count")[0];
    assert_eq!(count.get_document("query").unwrap(), &doc! { "age": { "$gt": 30 } });
    assert!(server.calls.lock().iter().all(|(db, _)| db == "shop"));
}

#[tokio::test]
async fn test_columns_and_graph_infer_references() {
    let (plugin, config, _server) = setup();
    let columns = plugin.get_columns_for_table(&config, "shop", "orders").await.unwrap();
    let id = columns.iter().find(|c| c.name == "_id").unwrap();
    assert!(id.is_primary);
    assert_eq!(id.type_name, "ObjectId");
    let user = columns.iter().find(|c| c.name == "user_id").unwrap();
    assert!(user.is_foreign_key);
    assert_eq!(user.referenced_table.as_deref(), Some("users"));
    assert_eq!(user.referenced_column.as_deref(), Some("_id"));
    assert_eq!(columns.iter().find(|c| c.name == "total").unwrap().type_name, "double");

    let relationships = plugin.get_foreign_key_relationships(&config, "shop", "orders").await.unwrap();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships["user_id"].referenced_table, "users");

    let graph = plugin.get_graph(&config, "shop").await.unwrap();
    let orders = graph.iter().find(|g| g.unit.name == "orders").unwrap();
    assert_eq!(
        orders.relations,
        vec![GraphUnitRelationship {
            name: "users".into(),
            relationship_type: RelationshipType::ManyToOne,
        }]
    );
    let view = graph.iter().find(|g| g.unit.name == "active_users").unwrap();
    assert_eq!(view.unit.attribute("Type"), Some("View"));
    assert!(view.relations.is_empty());
}

#[tokio::test]
async fn test_bulk_add_rows_batches_inserts() {
    let (plugin, config, server) = setup();
    let rows: Vec<Vec<Record>> = (0..2_500)
        .map(|i| vec![Record::new("n", i.to_string()).with_extra("Type", "int")])
        .collect();
    assert!(plugin.bulk_add_rows(&config, "shop", "numbers", &rows).await.unwrap());

    let sizes: Vec<usize> = server
        .commands("insert")
        .iter()
        .map(|c| c.get_array("documents").unwrap().len())
        .collect();
    assert_eq!(sizes, vec![1000, 1000, 500]);
    let first = server.commands("insert")[0].get_array("documents").unwrap()[0].clone();
    assert_eq!(first, Bson::Document(doc! { "n": 0 }));
}

#[tokio::test]
async fn test_update_sets_selected_fields_by_id() {
    let (plugin, config, server) = setup();
    *server.matched.lock() = 1;
    let values = vec![Record::new(
        "document",
        format!("{{\"_id\": \"{}\", \"name\": \"Al\", \"age\": 32}}", USER),
    )];
    assert!(plugin
        .update_row(&config, "shop", "users", &values, &["name".to_string()])
        .await
        .unwrap());

    let update = &server.commands("update")[0];
    let statement = update.get_array("updates").unwrap()[0].as_document().unwrap().clone();
    assert_eq!(
        statement.get_document("q").unwrap(),
        &doc! { "_id": ObjectId::parse_str(USER).unwrap() }
    );
    assert_eq!(statement.get_document("u").unwrap(), &doc! { "$set": { "name": "Al" } });

    *server.matched.lock() = 0;
    let err = plugin.update_row(&config, "shop", "users", &values, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = plugin
        .update_row(&config, "shop", "users", &[Record::new("document", "{\"name\": \"x\"}")], &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
}

#[tokio::test]
async fn test_delete_removes_one_document() {
    let (plugin, config, server) = setup();
    *server.matched.lock() = 1;
    assert!(plugin
        .delete_row(&config, "shop", "users", &[Record::new("_id", USER)])
        .await
        .unwrap());
    let delete = &server.commands("delete")[0];
    let statement = delete.get_array("deletes").unwrap()[0].as_document().unwrap().clone();
    assert_eq!(statement.get_i32("limit").unwrap(), 1);

    *server.matched.lock() = 0;
    let err = plugin
        .delete_row(&config, "shop", "users", &[Record::new("_id", USER)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_export_writes_bson_header() {
    let (plugin, config, _server) = setup();
    let mut out: Vec<Vec<String>> = Vec::new();
    let mut writer = |row: &[String]| {
        out.push(row.to_vec());
        Ok::<(), EngineError>(())
    };
    plugin
        .export_data(&config, "shop", "users", &mut writer, &[])
        .await
        .unwrap();

    assert_eq!(out[0], vec!["_id:BSON", "name:BSON", "age:BSON", "joined:BSON"]);
    assert_eq!(out[1], vec![USER, "Alice", "31", ""]);
    assert_eq!(out[2][3], "1970-01-01T00:00:00Z");

    let mut sink = |_: &[String]| Ok::<(), EngineError>(());
    let err = plugin
        .export_data(&config, "shop", "users", &mut sink, &[vec![Record::new("_id", USER)]])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
}

#[tokio::test]
async fn test_import_overwrite_drops_then_inserts() {
    let (plugin, config, server) = setup();
    let mut rows = vec![
        vec!["_id:BSON".to_string(), "name:BSON".to_string(), "age:int".to_string()],
        vec![USER.to_string(), "Carol".to_string(), "40".to_string()],
        vec!["".to_string(), "Dan".to_string(), "forty".to_string()],
    ]
    .into_iter();
    let mut reader = move || Ok::<_, EngineError>(rows.next());
    let options = ImportOptions {
        mode: ImportMode::Overwrite,
        skip_errors: true,
    };
    let result = plugin
        .import_data(&config, "shop", "users", &mut reader, &options)
        .await
        .unwrap();
    assert_eq!(result, ImportResult { imported: 1, skipped: 1 });

    let names = server.names();
    let drop = names.iter().position(|n| n == "drop").unwrap();
    let insert = names.iter().position(|n| n == "insert").unwrap();
    assert!(drop < insert);
    let inserted = server.commands("insert")[0].get_array("documents").unwrap()[0].clone();
    assert_eq!(
        inserted,
        Bson::Document(doc! { "_id": ObjectId::parse_str(USER).unwrap(), "name": "Carol", "age": 40 })
    );
}

#[tokio::test]
async fn test_unsupported_operations() {
    let (plugin, config, _server) = setup();
    assert!(plugin.clear_table_data(&config, "shop", "users").await.is_err());
    assert!(plugin.raw_execute(&config, "db.users.find()").await.is_err());
    let err = plugin
        .get_rows(
            &config,
            "shop",
            "users",
            &RowsRequest::page(10, 0).with_condition(WhereCondition::atomic("name", "LIKE", "A%", "")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
}
