//! Connection Manager
//!
//! The only component that acquires native handles. Pools are cached per
//! credential fingerprint, pinged on reuse and evicted lazily by idle TTL and an
//! LRU bound.

use super::config::{ConnectionConfig, PluginConfig, PoolOptions};
use super::connection::{
    ConnectionPool, Connector, NativeColumn, NativeConnection, PoolStats, QueryResult,
};
use super::database_types::DatabaseType;
use super::error::{EngineError, Result};
use super::value::Value;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

struct CachedPool {
    pool: Arc<dyn ConnectionPool>,
    db_type: DatabaseType,
    last_used: Instant,
}

/// Pooled access to every configured backing store
pub struct ConnectionManager {
    connectors: HashMap<DatabaseType, Arc<dyn Connector>>,
    pools: Mutex<HashMap<String, CachedPool>>,
    options: PoolOptions,
}

impl ConnectionManager {
    /// Create a manager with no connectors registered
    pub fn new(options: PoolOptions) -> Self {
        Self {
            connectors: HashMap::new(),
            pools: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Register the connector used for `connector.database_type()`
    pub fn with_connector(self, connector: Arc<dyn Connector>) -> Self {
        let db_type = connector.database_type();
        self.with_connector_for(db_type, connector)
    }

    /// Register `connector` for another store kind that shares its wire protocol
    pub fn with_connector_for(mut self, db_type: DatabaseType, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(db_type, connector);
        self
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Number of cached pools
    pub fn cached_pools(&self) -> usize {
        self.pools.lock().len()
    }

    /// Stats of the pool cached for `config`, if any
    pub fn pool_stats(&self, config: &ConnectionConfig) -> Option<PoolStats> {
        self.pools
            .lock()
            .get(&config.cache_key())
            .map(|c| c.pool.stats())
    }

    /// Check out a handle for `config`.
    ///
    /// Acquisition races the caller's cancellation and deadline. Any failure to
    /// open surfaces as a connection error.
    pub async fn acquire(&self, config: &PluginConfig) -> Result<ConnectionHandle> {
        let connect_timeout = config
            .connection
            .resolve()
            .map(|r| r.connect_timeout)
            .unwrap_or(self.options.acquire_timeout);
        let budget = connect_timeout.max(self.options.acquire_timeout);

        config
            .context
            .run(budget, self.open(&config.connection))
            .await
            .map_err(|e| match e {
                EngineError::Cancelled
                | EngineError::Timeout(_)
                | EngineError::Connection(_)
                | EngineError::Validation(_) => e,
                other => EngineError::connection(format!(
                    "failed to connect to {}: {}",
                    config.connection.identifier(),
                    other
                )),
            })
    }

    /// Acquire, run `operation`, release.
    ///
    /// The handle is released on every exit path: success, error, cancellation
    /// and unwinding all drop it. A handle dropped inside an open transaction is
    /// rolled back before it goes back to the pool.
    pub async fn with_connection<T, F, Fut>(&self, config: &PluginConfig, operation: F) -> Result<T>
    where
        F: FnOnce(ConnectionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let handle = self.acquire(config).await?;
        config.context.run(operation(handle)).await
    }

    /// Drop the pool cached for `config` (logout)
    pub fn remove(&self, config: &ConnectionConfig) -> bool {
        let removed = self.pools.lock().remove(&config.cache_key());
        match removed {
            Some(cached) => {
                cached.pool.close();
                info!(target: "connection_manager", identifier = %config.identifier(), "Removed cached pool");
                true
            }
            None => false,
        }
    }

    /// Close every cached pool (shutdown)
    pub fn close_all(&self) {
        let drained: Vec<CachedPool> = self.pools.lock().drain().map(|(_, v)| v).collect();
        let count = drained.len();
        for cached in drained {
            cached.pool.close();
        }
        info!(target: "connection_manager", pools = count, "Closed all cached pools");
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<ConnectionHandle> {
        let key = config.cache_key();
        self.evict_expired();

        let cached = {
            let mut pools = self.pools.lock();
            pools.get_mut(&key).map(|c| {
                c.last_used = Instant::now();
                Arc::clone(&c.pool)
            })
        };

        if let Some(pool) = cached {
            match self.checkout(&pool).await {
                Ok(handle) => {
                    debug!(target: "connection_manager", cache_key = %&key[..12], "Reusing cached pool");
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(
                        target: "connection_manager",
                        identifier = %config.identifier(),
                        error = %e,
                        "Cached pool failed health check, reconnecting"
                    );
                    if let Some(stale) = self.pools.lock().remove(&key) {
                        stale.pool.close();
                    }
                }
            }
        }

        let pool = self.create_pool(config).await?;
        let handle = self.checkout(&pool).await?;
        match self.insert(key, config.db_type, Arc::clone(&pool)) {
            None => Ok(handle),
            Some(winner) => {
                drop(handle);
                pool.close();
                debug!(
                    target: "connection_manager",
                    identifier = %config.identifier(),
                    "Pool opened concurrently, keeping the cached one"
                );
                self.checkout(&winner).await
            }
        }
    }

    async fn create_pool(&self, config: &ConnectionConfig) -> Result<Arc<dyn ConnectionPool>> {
        let connector = self.connectors.get(&config.db_type).ok_or_else(|| {
            EngineError::connection(format!("no connector registered for {}", config.db_type))
        })?;
        let resolved = config.resolve()?;
        info!(
            target: "connection_manager",
            identifier = %config.identifier(),
            "Opening connection pool"
        );
        connector.connect(&resolved, &self.options).await
    }

    async fn checkout(&self, pool: &Arc<dyn ConnectionPool>) -> Result<ConnectionHandle> {
        let acquire = async {
            let mut conn = pool.acquire().await?;
            conn.ping().await?;
            Ok::<_, EngineError>(conn)
        };
        let conn = tokio::time::timeout(self.options.acquire_timeout, acquire)
            .await
            .map_err(|_| EngineError::timeout(self.options.acquire_timeout.as_millis() as u64))??;
        Ok(ConnectionHandle::new(conn))
    }

    /// Cache `pool` under `key`. When another open cached a pool for the same
    /// key first, nothing is inserted and that pool is returned instead.
    fn insert(
        &self,
        key: String,
        db_type: DatabaseType,
        pool: Arc<dyn ConnectionPool>,
    ) -> Option<Arc<dyn ConnectionPool>> {
        let evicted = {
            let mut pools = self.pools.lock();
            if let Some(existing) = pools.get_mut(&key) {
                existing.last_used = Instant::now();
                return Some(Arc::clone(&existing.pool));
            }
            pools.insert(
                key,
                CachedPool {
                    pool,
                    db_type,
                    last_used: Instant::now(),
                },
            );
            let mut evicted = Vec::new();
            while pools.len() > self.options.max_cached_pools {
                let lru = pools
                    .iter()
                    .filter(|(_, c)| c.pool.stats().is_idle())
                    .min_by_key(|(_, c)| c.last_used)
                    .map(|(k, _)| k.clone());
                match lru.and_then(|k| pools.remove(&k)) {
                    Some(c) => evicted.push(c),
                    None => {
                        warn!(
                            target: "connection_manager",
                            cached = pools.len(),
                            "Pool cache over capacity but every pool is busy"
                        );
                        break;
                    }
                }
            }
            evicted
        };
        for cached in evicted {
            debug!(target: "connection_manager", db_type = %cached.db_type, "Evicted least recently used pool");
            cached.pool.close();
        }
        None
    }

    fn evict_expired(&self) {
        let ttl = self.options.idle_ttl;
        let expired: Vec<CachedPool> = {
            let mut pools = self.pools.lock();
            let keys: Vec<String> = pools
                .iter()
                .filter(|(_, c)| c.last_used.elapsed() > ttl && c.pool.stats().is_idle())
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| pools.remove(k)).collect()
        };
        for cached in expired {
            debug!(target: "connection_manager", db_type = %cached.db_type, "Evicted idle pool");
            cached.pool.close();
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(PoolOptions::default())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for (_, cached) in self.pools.lock().drain() {
            cached.pool.close();
        }
    }
}

/// A checked-out handle.
///
/// Returns to its pool on drop. If it is dropped while a transaction is open,
/// a rollback is scheduled on the runtime first.
pub struct ConnectionHandle {
    conn: Option<Box<dyn NativeConnection>>,
}

impl ConnectionHandle {
    pub fn new(conn: Box<dyn NativeConnection>) -> Self {
        Self { conn: Some(conn) }
    }

    fn inner(&mut self) -> Result<&mut Box<dyn NativeConnection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| EngineError::connection("connection handle already released"))
    }
}

#[async_trait]
impl NativeConnection for ConnectionHandle {
    fn database_type(&self) -> DatabaseType {
        self.conn
            .as_ref()
            .map(|c| c.database_type())
            .unwrap_or(DatabaseType::Sqlite)
    }

    async fn ping(&mut self) -> Result<()> {
        self.inner()?.ping().await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.inner()?.execute(sql, params).await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.inner()?.query(sql, params).await
    }

    async fn begin(&mut self) -> Result<()> {
        self.inner()?.begin().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.inner()?.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inner()?.rollback().await
    }

    fn in_transaction(&self) -> bool {
        self.conn.as_ref().map(|c| c.in_transaction()).unwrap_or(false)
    }

    async fn describe_table(&mut self, full_table_name: &str) -> Result<Vec<NativeColumn>> {
        self.inner()?.describe_table(full_table_name).await
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if !conn.in_transaction() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    target: "connection_manager",
                    db_type = %conn.database_type(),
                    "Handle released inside an open transaction, rolling back"
                );
                handle.spawn(async move {
                    if let Err(e) = conn.rollback().await {
                        warn!(target: "connection_manager", error = %e, "Rollback on release failed");
                    }
                });
            }
            Err(_) => {
                // the driver rolls back when the native handle closes
                warn!(
                    target: "connection_manager",
                    "Handle released outside a runtime with an open transaction"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{OperationContext, ResolvedConnection};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeConn {
        healthy: Arc<AtomicBool>,
        in_tx: bool,
        rollbacks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NativeConnection for FakeConn {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Sqlite
        }
        async fn ping(&mut self) -> Result<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(EngineError::connection("connection closed"))
            }
        }
        async fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<u64> {
            Ok(1)
        }
        async fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            Ok(QueryResult::default())
        }
        async fn begin(&mut self) -> Result<()> {
            self.in_tx = true;
            Ok(())
        }
        async fn commit(&mut self) -> Result<()> {
            self.in_tx = false;
            Ok(())
        }
        async fn rollback(&mut self) -> Result<()> {
            self.in_tx = false;
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            self.in_tx
        }
    }

    struct FakePool {
        healthy: Arc<AtomicBool>,
        rollbacks: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConnectionPool for FakePool {
        async fn acquire(&self) -> Result<Box<dyn NativeConnection>> {
            Ok(Box::new(FakeConn {
                healthy: Arc::clone(&self.healthy),
                in_tx: false,
                rollbacks: Arc::clone(&self.rollbacks),
            }))
        }
        fn stats(&self) -> PoolStats {
            PoolStats {
                size: 1,
                available: 1,
                waiting: 0,
            }
        }
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        opened: AtomicUsize,
        healthy: Arc<AtomicBool>,
        rollbacks: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail: bool,
        connect_delay: Option<Duration>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Sqlite
        }
        async fn connect(
            &self,
            _config: &ResolvedConnection,
            _options: &PoolOptions,
        ) -> Result<Arc<dyn ConnectionPool>> {
            if self.fail {
                return Err(EngineError::query("unable to open database file"));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            self.healthy.store(true, Ordering::SeqCst);
            Ok(Arc::new(FakePool {
                healthy: Arc::clone(&self.healthy),
                rollbacks: Arc::clone(&self.rollbacks),
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    fn plugin_config(db: &str) -> PluginConfig {
        PluginConfig::new(ConnectionConfig::sqlite(db))
    }

    #[tokio::test]
    async fn test_pool_reused_for_same_credentials() {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::default().with_connector(connector.clone());

        for _ in 0..3 {
            let n = manager
                .with_connection(&plugin_config("a.db"), |mut conn| async move {
                    conn.execute("SELECT 1", &[]).await
                })
                .await
                .unwrap();
            assert_eq!(n, 1);
        }
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);

        manager
            .with_connection(&plugin_config("b.db"), |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(manager.cached_pools(), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_pool_is_replaced() {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::default().with_connector(connector.clone());
        let config = plugin_config("a.db");

        manager.with_connection(&config, |_| async { Ok(()) }).await.unwrap();
        connector.healthy.store(false, Ordering::SeqCst);
        manager.with_connection(&config, |_| async { Ok(()) }).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_failure_is_connection_error() {
        let connector = Arc::new(FakeConnector {
            fail: true,
            ..Default::default()
        });
        let manager = ConnectionManager::default().with_connector(connector);
        let err = manager
            .with_connection(&plugin_config("a.db"), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::new(PoolOptions::default().with_max_cached_pools(2))
            .with_connector(connector);
        for db in ["a.db", "b.db", "c.db"] {
            manager
                .with_connection(&plugin_config(db), |_| async { Ok(()) })
                .await
                .unwrap();
        }
        assert_eq!(manager.cached_pools(), 2);
        assert!(manager.pool_stats(&ConnectionConfig::sqlite("a.db")).is_none());
    }

    #[tokio::test]
    async fn test_remove_and_close_all() {
        let manager =
            ConnectionManager::default().with_connector(Arc::new(FakeConnector::default()));
        let config = plugin_config("a.db");
        manager.with_connection(&config, |_| async { Ok(()) }).await.unwrap();
        assert!(manager.remove(&config.connection));
        assert!(!manager.remove(&config.connection));

        manager.with_connection(&config, |_| async { Ok(()) }).await.unwrap();
        manager.close_all();
        assert_eq!(manager.cached_pools(), 0);
    }

    #[tokio::test]
    async fn test_cancel_rolls_back_open_transaction() {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::default().with_connector(connector.clone());
        let ctx = OperationContext::with_timeout(Duration::from_millis(20));
        let config = plugin_config("a.db").with_context(ctx);

        let err = manager
            .with_connection(&config, |mut conn| async move {
                conn.begin().await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                conn.commit().await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_long_operation_outlives_statement_timeout() {
        let manager = ConnectionManager::new(
            PoolOptions::default().with_operation_timeout(Duration::from_millis(10)),
        )
        .with_connector(Arc::new(FakeConnector::default()));

        let pages = manager
            .with_connection(&plugin_config("a.db"), |mut conn| async move {
                let mut pages = 0;
                for _ in 0..5 {
                    conn.query("SELECT * FROM t LIMIT 100", &[]).await?;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    pages += 1;
                }
                Ok(pages)
            })
            .await
            .unwrap();
        assert_eq!(pages, 5);
    }

    #[tokio::test]
    async fn test_concurrent_misses_keep_one_pool() {
        let connector = Arc::new(FakeConnector {
            connect_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let manager = ConnectionManager::default().with_connector(connector.clone());
        let config = plugin_config("a.db");

        let (a, b) = tokio::join!(
            manager.with_connection(&config, |mut conn| async move { conn.execute("SELECT 1", &[]).await }),
            manager.with_connection(&config, |mut conn| async move { conn.execute("SELECT 2", &[]).await }),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 1));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.cached_pools(), 1);

        manager.with_connection(&config, |_| async { Ok(()) }).await.unwrap();
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_connector() {
        let manager = ConnectionManager::default();
        let err = manager
            .with_connection(&plugin_config("a.db"), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
    }
}
