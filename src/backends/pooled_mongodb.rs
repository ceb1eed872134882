//! MongoDB adapter
//!
//! A `mongodb::Client` pools its own sockets, so the "pool" holds one client and
//! hands out clones. Statements are database commands: `sql` is the command
//! name, `params[0]` the target database (empty for the profile's database) and
//! `params[1]` the whole command as BSON bytes. Every reply document comes back
//! as one `document` row holding BSON bytes.

use crate::core::config::{PoolOptions, ResolvedConnection};
use crate::core::connection::{ColumnMeta, ConnectionPool, Connector, NativeConnection, PoolStats, QueryResult};
use crate::core::database_types::DatabaseType;
use crate::core::error::{EngineError, Result};
use crate::core::value::Value;
use ::mongodb::bson::{doc, Bson, Document};
use ::mongodb::options::{ClientOptions, Credential};
use ::mongodb::{Client, Database};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Database used when neither the call nor the profile names one
pub const FALLBACK_DATABASE: &str = "admin";

/// Commands whose reply is a cursor over many documents
const CURSOR_COMMANDS: &[&str] = &["find", "aggregate", "listCollections", "listIndexes"];

/// Opens [`MongoPool`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDb
    }

    async fn connect(
        &self,
        config: &ResolvedConnection,
        options: &PoolOptions,
    ) -> Result<Arc<dyn ConnectionPool>> {
        Ok(Arc::new(MongoPool::open(config, options).await?))
    }
}

/// `mongodb://host:port/db` or, with a DNS seed list, `mongodb+srv://host/db`;
/// the raw URL parameters follow verbatim. Credentials never enter the URI.
pub fn connection_uri(config: &ResolvedConnection) -> String {
    let mut uri = if config.dns_seed_list {
        format!("mongodb+srv://{}/", config.host)
    } else {
        format!(
            "mongodb://{}:{}/",
            config.host,
            config.port.unwrap_or(27017)
        )
    };
    uri.push_str(&config.database);
    uri.push_str(&config.url_params);
    uri
}

pub fn encode_document(document: &Document) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    document
        .to_writer(&mut raw)
        .map_err(|e| EngineError::query(format!("failed to encode BSON document: {}", e)))?;
    Ok(raw)
}

pub fn decode_document(raw: &[u8]) -> Result<Document> {
    Document::from_reader(raw).map_err(|e| EngineError::query(format!("failed to decode BSON document: {}", e)))
}

/// Numeric reply field such as `n` or `nModified`, 0 when absent
pub fn reply_count(reply: &Document, key: &str) -> u64 {
    match reply.get(key) {
        Some(Bson::Int32(n)) => (*n).max(0) as u64,
        Some(Bson::Int64(n)) => (*n).max(0) as u64,
        Some(Bson::Double(n)) if *n > 0.0 => *n as u64,
        _ => 0,
    }
}

/// First entry of a write command's `writeErrors`, as a raw error
pub fn write_error(reply: &Document) -> Option<EngineError> {
    let first = reply.get_array("writeErrors").ok()?.first()?.as_document()?;
    let code = first.get_i32("code").unwrap_or_default();
    let message = first.get_str("errmsg").unwrap_or("write failed");
    Some(EngineError::query(format!("write error {}: {}", code, message)))
}

pub struct MongoPool {
    client: Client,
    default_database: String,
    max_size: usize,
    operation_timeout: Duration,
}

impl MongoPool {
    pub async fn open(config: &ResolvedConnection, options: &PoolOptions) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_uri(config).as_str()).await?;
        client_options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        client_options.connect_timeout = Some(config.connect_timeout);
        client_options.server_selection_timeout = Some(config.connect_timeout);
        client_options.max_pool_size = Some(options.max_size.max(1) as u32);
        if !config.username.is_empty() {
            let mut credential = Credential::default();
            credential.username = Some(config.username.clone());
            credential.password = Some(config.password.clone()).filter(|p| !p.is_empty());
            client_options.credential = Some(credential);
        }

        let client = Client::with_options(client_options)?;
        tokio::time::timeout(
            config.connect_timeout,
            client.database(FALLBACK_DATABASE).run_command(doc! { "ping": 1 }),
        )
        .await
        .map_err(|_| EngineError::timeout(config.connect_timeout.as_millis() as u64))??;

        debug!(target: "mongodb", host = %config.host, database = %config.database, srv = config.dns_seed_list, "Opened MongoDB client");
        Ok(Self {
            client,
            default_database: config.database.clone(),
            max_size: options.max_size,
            operation_timeout: options.operation_timeout,
        })
    }
}

#[async_trait]
impl ConnectionPool for MongoPool {
    async fn acquire(&self) -> Result<Box<dyn NativeConnection>> {
        Ok(Box::new(MongoConnection {
            client: self.client.clone(),
            default_database: self.default_database.clone(),
            operation_timeout: self.operation_timeout,
        }))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.max_size,
            available: self.max_size,
            waiting: 0,
        }
    }

    // The client's sockets close once its last clone drops
    fn close(&self) {}
}

/// One clone of the shared client
pub struct MongoConnection {
    client: Client,
    default_database: String,
    operation_timeout: Duration,
}

impl MongoConnection {
    fn target(&self, params: &[Value]) -> Result<(Database, Document)> {
        let name = match params.first() {
            Some(Value::Text(db)) if !db.is_empty() => db.as_str(),
            _ if !self.default_database.is_empty() => self.default_database.as_str(),
            _ => FALLBACK_DATABASE,
        };
        let command = match params.get(1) {
            Some(Value::Bytes(raw)) => decode_document(raw)?,
            _ => {
                return Err(EngineError::validation(
                    "MongoDB commands take a database name and an encoded command document",
                ))
            }
        };
        Ok((self.client.database(name), command))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.operation_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| EngineError::timeout(timeout.as_millis() as u64))?
    }

    async fn reply(&self, params: &[Value]) -> Result<Document> {
        let (database, command) = self.target(params)?;
        let reply = self.bounded(async { Ok(database.run_command(command).await?) }).await?;
        match write_error(&reply) {
            Some(err) => Err(err),
            None => Ok(reply),
        }
    }
}

fn document_rows(rows: Vec<Value>) -> QueryResult {
    QueryResult {
        columns: vec![ColumnMeta::new("document", "BSON")],
        rows: rows.into_iter().map(|raw| vec![raw]).collect(),
    }
}

#[async_trait]
impl NativeConnection for MongoConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDb
    }

    async fn ping(&mut self) -> Result<()> {
        let ping = encode_document(&doc! { "ping": 1 })?;
        self.reply(&[Value::Text(FALLBACK_DATABASE.to_string()), Value::Bytes(ping)])
            .await
            .map(|_| ())
    }

    /// Returns the reply's `n`
    async fn execute(&mut self, _sql: &str, params: &[Value]) -> Result<u64> {
        Ok(reply_count(&self.reply(params).await?, "n"))
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        if !CURSOR_COMMANDS.contains(&sql) {
            let reply = self.reply(params).await?;
            return Ok(document_rows(vec![Value::Bytes(encode_document(&reply)?)]));
        }

        let (database, command) = self.target(params)?;
        let rows = self
            .bounded(async {
                let mut cursor = database.run_cursor_command(command).await?;
                let mut rows = Vec::new();
                while cursor.advance().await? {
                    rows.push(Value::Bytes(cursor.current().as_bytes().to_vec()));
                }
                Ok(rows)
            })
            .await?;
        Ok(document_rows(rows))
    }

    async fn begin(&mut self) -> Result<()> {
        Err(EngineError::unsupported("transactions are not supported for mongodb"))
    }

    async fn commit(&mut self) -> Result<()> {
        Err(EngineError::unsupported("transactions are not supported for mongodb"))
    }

    async fn rollback(&mut self) -> Result<()> {
        Err(EngineError::unsupported("transactions are not supported for mongodb"))
    }

    fn in_transaction(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConnectionConfig;
    use crate::core::config::{ADV_DNS_ENABLED, ADV_PORT, ADV_URL_PARAMS};

    #[test]
    fn test_connection_uri() {
        let resolved = ConnectionConfig::new(DatabaseType::MongoDb)
            .with_host("db.internal")
            .with_database("shop")
            .with_password("s3cret")
            .resolve()
            .unwrap();
        assert_eq!(connection_uri(&resolved), "mongodb://db.internal:27017/shop");

        let resolved = ConnectionConfig::new(DatabaseType::MongoDb)
            .with_host("cluster0.example.net")
            .with_advanced(ADV_PORT, "27018")
            .with_advanced(ADV_DNS_ENABLED, "true")
            .with_advanced(ADV_URL_PARAMS, "?retryWrites=true&w=majority")
            .resolve()
            .unwrap();
        let uri = connection_uri(&resolved);
        assert_eq!(uri, "mongodb+srv://cluster0.example.net/?retryWrites=true&w=majority");
        assert!(!uri.contains("s3cret"));
    }

    #[test]
    fn test_reply_helpers() {
        let reply = doc! { "n": 2, "nModified": 1_i64, "ok": 1.0 };
        assert_eq!(reply_count(&reply, "n"), 2);
        assert_eq!(reply_count(&reply, "nModified"), 1);
        assert_eq!(reply_count(&reply, "missing"), 0);
        assert!(write_error(&reply).is_none());

        let reply = doc! {
            "n": 0,
            "writeErrors": [{ "index": 0, "code": 11000, "errmsg": "E11000 duplicate key error" }],
        };
        let err = write_error(&reply).unwrap();
        assert!(err.to_string().contains("E11000 duplicate key"));
        assert!(err.is_raw());
    }

    #[test]
    fn test_document_bytes_keep_field_order() {
        let command = doc! { "find": "users", "filter": { "age": { "$gt": 3 } }, "limit": 5_i64 };
        let decoded = decode_document(&encode_document(&command).unwrap()).unwrap();
        assert_eq!(decoded.keys().next().map(String::as_str), Some("find"));
        assert_eq!(decoded, command);
        assert!(decode_document(b"not bson").is_err());
    }
}
