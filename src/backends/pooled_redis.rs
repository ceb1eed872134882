//! Redis adapter
//!
//! A multiplexed connection already pipelines concurrent callers, so the
//! "pool" holds exactly one and hands out clones. Statements are Redis
//! commands: `sql` is the command name and `params` are its arguments.

use crate::core::config::{PoolOptions, ResolvedConnection};
use crate::core::connection::{ColumnMeta, ConnectionPool, Connector, NativeConnection, PoolStats, QueryResult};
use crate::core::database_types::DatabaseType;
use crate::core::error::{EngineError, Result};
use crate::core::value::Value;
use ::redis::aio::MultiplexedConnection;
use ::redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Opens [`RedisPool`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Redis
    }

    async fn connect(
        &self,
        config: &ResolvedConnection,
        options: &PoolOptions,
    ) -> Result<Arc<dyn ConnectionPool>> {
        Ok(Arc::new(RedisPool::open(config, options).await?))
    }
}

/// Parse the logical database index; empty selects database 0
pub fn database_index(database: &str) -> Result<i64> {
    let trimmed = database.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<i64>()
        .ok()
        .filter(|db| *db >= 0)
        .ok_or_else(|| EngineError::validation(format!("invalid Redis database index: {}", database)))
}

pub struct RedisPool {
    conn: MultiplexedConnection,
    operation_timeout: Duration,
}

impl RedisPool {
    pub async fn open(config: &ResolvedConnection, options: &PoolOptions) -> Result<Self> {
        if let Some(mode) = config.ssl_mode.as_deref() {
            if !matches!(mode.to_lowercase().as_str(), "" | "disable" | "disabled") {
                return Err(EngineError::validation(format!(
                    "unsupported SSL mode for Redis: {}",
                    mode
                )));
            }
        }

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port.unwrap_or(6379)),
            redis: RedisConnectionInfo {
                db: database_index(&config.database)?,
                username: Some(config.username.clone()).filter(|u| !u.is_empty()),
                password: Some(config.password.clone()).filter(|p| !p.is_empty()),
                ..Default::default()
            },
        };
        let client = ::redis::Client::open(info)?;
        let conn = tokio::time::timeout(config.connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| EngineError::timeout(config.connect_timeout.as_millis() as u64))??;

        debug!(target: "redis", host = %config.host, database = %config.database, "Opened Redis connection");
        Ok(Self {
            conn,
            operation_timeout: options.operation_timeout,
        })
    }
}

#[async_trait]
impl ConnectionPool for RedisPool {
    async fn acquire(&self) -> Result<Box<dyn NativeConnection>> {
        Ok(Box::new(RedisConnection {
            conn: self.conn.clone(),
            operation_timeout: self.operation_timeout,
        }))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: 1,
            available: 1,
            waiting: 0,
        }
    }

    // The multiplexed connection closes when its last clone drops
    fn close(&self) {}
}

/// One clone of the shared multiplexed connection
pub struct RedisConnection {
    conn: MultiplexedConnection,
    operation_timeout: Duration,
}

impl RedisConnection {
    async fn call(&mut self, command: &str, args: &[Value]) -> Result<::redis::Value> {
        let mut cmd = ::redis::cmd(command);
        for arg in args {
            match arg {
                Value::Bytes(bytes) => cmd.arg(bytes.as_slice()),
                other => cmd.arg(other.to_display_string()),
            };
        }
        let timeout = self.operation_timeout;
        let reply: ::redis::Value = tokio::time::timeout(timeout, cmd.query_async(&mut self.conn))
            .await
            .map_err(|_| EngineError::timeout(timeout.as_millis() as u64))??;
        Ok(reply)
    }
}

/// Map one reply onto a tagged value
pub fn reply_value(reply: ::redis::Value) -> Value {
    use ::redis::Value as R;
    match reply {
        R::Nil => Value::Null,
        R::Int(v) => Value::Int(v),
        R::BulkString(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
        R::SimpleString(s) => Value::Text(s),
        R::Okay => Value::Text("OK".to_string()),
        R::Double(v) => Value::Float(v),
        R::Boolean(v) => Value::Bool(v),
        R::Array(items) | R::Set(items) => Value::Array(items.into_iter().map(reply_value).collect()),
        other => ::redis::from_redis_value::<String>(&other)
            .map(Value::Text)
            .unwrap_or(Value::Null),
    }
}

/// Flatten a reply into rows.
///
/// Arrays become one `value` row per element, maps become `key`/`value`
/// rows and scalars a single row.
pub fn reply_rows(reply: ::redis::Value) -> QueryResult {
    use ::redis::Value as R;
    match reply {
        R::Array(items) | R::Set(items) => QueryResult {
            columns: vec![ColumnMeta::new("value", "TEXT")],
            rows: items.into_iter().map(|item| vec![reply_value(item)]).collect(),
        },
        R::Map(pairs) => QueryResult {
            columns: vec![ColumnMeta::new("key", "TEXT"), ColumnMeta::new("value", "TEXT")],
            rows: pairs
                .into_iter()
                .map(|(k, v)| vec![reply_value(k), reply_value(v)])
                .collect(),
        },
        scalar => QueryResult {
            columns: vec![ColumnMeta::new("value", "TEXT")],
            rows: vec![vec![reply_value(scalar)]],
        },
    }
}

#[async_trait]
impl NativeConnection for RedisConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Redis
    }

    async fn ping(&mut self) -> Result<()> {
        self.call("PING", &[]).await.map(|_| ())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(match self.call(sql, params).await? {
            ::redis::Value::Int(n) => n.max(0) as u64,
            ::redis::Value::Okay => 1,
            _ => 0,
        })
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        Ok(reply_rows(self.call(sql, params).await?))
    }

    async fn begin(&mut self) -> Result<()> {
        Err(EngineError::unsupported("transactions are not supported for redis"))
    }

    async fn commit(&mut self) -> Result<()> {
        Err(EngineError::unsupported("transactions are not supported for redis"))
    }

    async fn rollback(&mut self) -> Result<()> {
        Err(EngineError::unsupported("transactions are not supported for redis"))
    }

    fn in_transaction(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::redis::Value as R;

    #[test]
    fn test_database_index() {
        assert_eq!(database_index("").unwrap(), 0);
        assert_eq!(database_index(" 3 ").unwrap(), 3);
        assert!(database_index("-1").is_err());
        assert!(database_index("zero").is_err());
    }

    #[test]
    fn test_reply_rows() {
        let result = reply_rows(R::Array(vec![
            R::BulkString(b"a".to_vec()),
            R::Nil,
            R::Int(4),
        ]));
        assert_eq!(result.columns, vec![ColumnMeta::new("value", "TEXT")]);
        assert_eq!(
            result.rows,
            vec![vec![Value::Text("a".into())], vec![Value::Null], vec![Value::Int(4)]]
        );

        let result = reply_rows(R::Okay);
        assert_eq!(result.rows, vec![vec![Value::Text("OK".into())]]);

        let result = reply_rows(R::Map(vec![(R::SimpleString("f".into()), R::Double(1.5))]));
        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.rows[0], vec![Value::Text("f".into()), Value::Float(1.5)]);
    }
}
