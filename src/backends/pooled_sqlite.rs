//! Pooled SQLite adapter
//!
//! Native handles come from a `deadpool-sqlite` pool. Every statement runs on
//! the pool's blocking thread through `interact`, bounded by the operation
//! timeout from [`PoolOptions`].

use crate::core::config::{PoolOptions, ResolvedConnection};
use crate::core::connection::{
    ColumnMeta, ConnectionPool, Connector, NativeColumn, NativeConnection, PoolStats, QueryResult,
};
use crate::core::database_types::DatabaseType;
use crate::core::error::{EngineError, Result};
use crate::core::value::Value;
use async_trait::async_trait;
use deadpool_sqlite::{Config, Object, Pool, PoolConfig, Runtime};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, ToSql};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Opens [`SqlitePool`]s for file paths (or `:memory:` URIs)
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

#[async_trait]
impl Connector for SqliteConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(
        &self,
        config: &ResolvedConnection,
        options: &PoolOptions,
    ) -> Result<Arc<dyn ConnectionPool>> {
        let pool = SqlitePool::open(&config.database, options, config.readonly).await?;
        Ok(Arc::new(pool))
    }
}

/// A pool of SQLite handles for one database file
pub struct SqlitePool {
    pool: Pool,
    operation_timeout: Duration,
    readonly: bool,
}

impl SqlitePool {
    /// Open a pool for `path`
    ///
    /// # Errors
    ///
    /// Returns a connection error if the path is empty, the pool cannot be
    /// created, or the first handle cannot be initialized.
    pub async fn open(path: &str, options: &PoolOptions, readonly: bool) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(EngineError::validation("database file path is required"));
        }
        let mut config = Config::new(path);
        config.pool = Some(PoolConfig::new(options.max_size.max(1)));
        let pool = config
            .create_pool(Runtime::Tokio1)
            .map_err(|e| EngineError::connection(format!("failed to create pool: {}", e)))?;

        let conn = pool.get().await.map_err(|e| {
            EngineError::connection(format!("failed to acquire initial connection: {}", e))
        })?;
        conn.interact(|conn| {
            // PRAGMA journal_mode returns a row
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .map_err(|e| EngineError::connection(format!("interact error: {}", e)))?
        .map_err(|e| EngineError::connection(format!("failed to initialize database: {}", e)))?;

        debug!(target: "sqlite", path, max_size = options.max_size, "Opened SQLite pool");
        Ok(Self {
            pool,
            operation_timeout: options.operation_timeout,
            readonly,
        })
    }
}

#[async_trait]
impl ConnectionPool for SqlitePool {
    async fn acquire(&self) -> Result<Box<dyn NativeConnection>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| EngineError::connection(format!("failed to acquire connection: {}", e)))?;
        let mut handle = SqliteConnection {
            conn,
            operation_timeout: self.operation_timeout,
            in_tx: false,
        };
        let readonly = self.readonly;
        handle
            .interact(move |conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON")?;
                if readonly {
                    conn.execute_batch("PRAGMA query_only = ON")?;
                }
                Ok(())
            })
            .await?;
        Ok(Box::new(handle))
    }

    fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    fn close(&self) {
        self.pool.close();
    }
}

/// One checked-out SQLite handle
pub struct SqliteConnection {
    conn: Object,
    operation_timeout: Duration,
    in_tx: bool,
}

impl SqliteConnection {
    async fn interact<R, F>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        tokio::time::timeout(self.operation_timeout, self.conn.interact(f))
            .await
            .map_err(|_| EngineError::timeout(self.operation_timeout.as_millis() as u64))?
            .map_err(|e| EngineError::query(format!("interact error: {}", e)))?
            .map_err(EngineError::from)
    }

    async fn run_control(&mut self, sql: &'static str) -> Result<()> {
        self.interact(move |conn| conn.execute_batch(sql)).await
    }
}

/// Bind form of a value; SQLite stores dates and times as text
fn to_param(value: &Value) -> Box<dyn ToSql> {
    match value {
        Value::Null | Value::NullOf(_) => Box::new(None::<i64>),
        Value::Bool(v) => Box::new(*v),
        Value::Int(v) => Box::new(*v),
        Value::UInt(v) => match i64::try_from(*v) {
            Ok(v) => Box::new(v),
            Err(_) => Box::new(v.to_string()),
        },
        Value::Float(v) => Box::new(*v),
        Value::Bytes(v) => Box::new(v.clone()),
        Value::Date(d) => Box::new(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => Box::new(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Time(t) => Box::new(t.format("%H:%M:%S%.f").to_string()),
        Value::TimestampTz(ts) => Box::new(ts.to_rfc3339()),
        Value::Json(j) => Box::new(j.to_string()),
        other => Box::new(other.to_display_string()),
    }
}

fn decode(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).to_string()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
    }
}

#[async_trait]
impl NativeConnection for SqliteConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn ping(&mut self) -> Result<()> {
        self.interact(|conn| conn.query_row("SELECT 1", [], |_| Ok(()))).await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        let affected = self
            .interact(move |conn| {
                let bound: Vec<Box<dyn ToSql>> = params.iter().map(to_param).collect();
                conn.execute(&sql, params_from_iter(bound.iter()))
            })
            .await?;
        Ok(affected as u64)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.interact(move |conn| {
            let bound: Vec<Box<dyn ToSql>> = params.iter().map(to_param).collect();
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<ColumnMeta> = stmt
                .columns()
                .iter()
                .map(|c| ColumnMeta::new(c.name(), c.decl_type().unwrap_or_default().to_uppercase()))
                .collect();
            let width = columns.len();

            let mut rows = stmt.query(params_from_iter(bound.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(decode(row.get_ref(i)?));
                }
                out.push(values);
            }
            Ok(QueryResult { columns, rows: out })
        })
        .await
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_tx {
            return Err(EngineError::transaction("transaction already active"));
        }
        self.run_control("BEGIN").await?;
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_tx {
            return Err(EngineError::transaction("no active transaction"));
        }
        self.run_control("COMMIT").await?;
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_tx {
            return Err(EngineError::transaction("no active transaction"));
        }
        self.in_tx = false;
        self.run_control("ROLLBACK").await
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    async fn describe_table(&mut self, full_table_name: &str) -> Result<Vec<NativeColumn>> {
        let sql = format!("SELECT * FROM {} LIMIT 0", full_table_name);
        self.interact(move |conn| {
            let stmt = conn.prepare(&sql)?;
            let columns = stmt
                .columns()
                .iter()
                .map(|c| NativeColumn {
                    name: c.name().to_string(),
                    type_name: c.decl_type().unwrap_or_default().to_string(),
                    ..Default::default()
                })
                .collect();
            Ok(columns)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_pool(name: &str) -> SqlitePool {
        let path = format!("file:{}?mode=memory&cache=shared", name);
        SqlitePool::open(&path, &PoolOptions::default(), false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_and_query() -> Result<()> {
        let pool = open_pool("pooled_sqlite_exec").await;
        let mut conn = pool.acquire().await?;
        conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, name VARCHAR(20), score REAL)", &[])
            .await?;
        let affected = conn
            .execute(
                "INSERT INTO test (name, score) VALUES (?, ?)",
                &[Value::Text("Alice".into()), Value::Float(9.5)],
            )
            .await?;
        assert_eq!(affected, 1);

        let result = conn.query("SELECT id, name, score FROM test", &[]).await?;
        assert_eq!(result.len(), 1);
        assert_eq!(result.columns[1].type_name, "VARCHAR(20)");
        assert_eq!(result.rows[0][1], Value::Text("Alice".into()));
        assert_eq!(result.rows[0][2], Value::Float(9.5));
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_rollback() -> Result<()> {
        let pool = open_pool("pooled_sqlite_tx").await;
        let mut conn = pool.acquire().await?;
        conn.execute("CREATE TABLE t (id INTEGER)", &[]).await?;

        conn.begin().await?;
        assert!(conn.in_transaction());
        conn.execute("INSERT INTO t (id) VALUES (?)", &[Value::Int(1)]).await?;
        conn.rollback().await?;
        assert!(!conn.in_transaction());

        let result = conn.query("SELECT COUNT(*) FROM t", &[]).await?;
        assert_eq!(result.rows[0][0], Value::Int(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_describe_table() -> Result<()> {
        let pool = open_pool("pooled_sqlite_describe").await;
        let mut conn = pool.acquire().await?;
        conn.execute("CREATE TABLE d (id INTEGER, amount NUMERIC(10,2))", &[]).await?;
        let described = conn.describe_table("\"d\"").await?;
        assert_eq!(described.len(), 2);
        assert_eq!(described[1].name, "amount");
        assert_eq!(described[1].type_name, "NUMERIC(10,2)");
        Ok(())
    }

    #[tokio::test]
    async fn test_readonly_rejects_writes() -> Result<()> {
        let path = "file:pooled_sqlite_ro?mode=memory&cache=shared";
        let writable = SqlitePool::open(path, &PoolOptions::default(), false).await?;
        let mut conn = writable.acquire().await?;
        conn.execute("CREATE TABLE r (id INTEGER)", &[]).await?;

        let readonly = SqlitePool::open(path, &PoolOptions::default(), true).await?;
        let mut ro = readonly.acquire().await?;
        assert!(ro.execute("INSERT INTO r (id) VALUES (?)", &[Value::Int(1)]).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_pool_stats() -> Result<()> {
        let pool = open_pool("pooled_sqlite_stats").await;
        let _conn = pool.acquire().await?;
        let stats = pool.stats();
        assert!(stats.size > 0);
        Ok(())
    }
}
