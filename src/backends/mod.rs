//! Backend implementations
//!
//! Dialect facts are plain data and always compiled. Driver adapters are gated
//! on their Cargo feature and register themselves with a
//! [`ConnectionManager`] through [`default_manager`].

pub mod clickhouse;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

#[cfg(feature = "mongodb_support")]
pub mod mongo_store;
#[cfg(feature = "mongodb_support")]
pub mod pooled_mongodb;
#[cfg(feature = "mysql")]
pub mod pooled_mysql;
#[cfg(feature = "postgres")]
pub mod pooled_postgres;
#[cfg(feature = "redis_support")]
pub mod pooled_redis;
#[cfg(feature = "sqlite")]
pub mod pooled_sqlite;
#[cfg(feature = "redis_support")]
pub mod redis_store;

pub use clickhouse::ClickHouseDialect;
pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

#[cfg(feature = "mongodb_support")]
pub use mongo_store::MongoPlugin;
#[cfg(feature = "mongodb_support")]
pub use pooled_mongodb::{MongoConnector, MongoPool};
#[cfg(feature = "mysql")]
pub use pooled_mysql::{MysqlConnector, MysqlPool};
#[cfg(feature = "postgres")]
pub use pooled_postgres::{PostgresConnector, PostgresPool};
#[cfg(feature = "redis_support")]
pub use pooled_redis::{RedisConnector, RedisPool};
#[cfg(feature = "sqlite")]
pub use pooled_sqlite::{SqliteConnector, SqlitePool};
#[cfg(feature = "redis_support")]
pub use redis_store::RedisPlugin;

use crate::core::config::PoolOptions;
use crate::core::database_types::DatabaseType;
use crate::core::dialect::DialectFacts;
use crate::core::engine::SqlPlugin;
use crate::core::error::{EngineError, Result};
use crate::core::manager::ConnectionManager;
use crate::core::plugin::Plugin;
use std::sync::Arc;

/// A manager with a connector registered for every enabled backend
#[allow(unused_mut)]
pub fn default_manager(options: PoolOptions) -> ConnectionManager {
    let mut manager = ConnectionManager::new(options);
    #[cfg(feature = "sqlite")]
    {
        manager = manager.with_connector(Arc::new(SqliteConnector));
    }
    #[cfg(feature = "postgres")]
    {
        manager = manager.with_connector(Arc::new(PostgresConnector));
    }
    #[cfg(feature = "mysql")]
    {
        manager = manager
            .with_connector(Arc::new(MysqlConnector::new()))
            .with_connector(Arc::new(MysqlConnector::mariadb()));
    }
    #[cfg(feature = "redis_support")]
    {
        manager = manager.with_connector(Arc::new(RedisConnector));
    }
    #[cfg(feature = "mongodb_support")]
    {
        manager = manager.with_connector(Arc::new(MongoConnector));
    }
    manager
}

/// Dialect facts for a SQL store kind
pub fn dialect_for(db_type: DatabaseType) -> Result<Arc<dyn DialectFacts>> {
    match db_type {
        DatabaseType::Sqlite => Ok(Arc::new(SqliteDialect::new())),
        DatabaseType::Postgres => Ok(Arc::new(PostgresDialect::new())),
        DatabaseType::Mysql => Ok(Arc::new(MysqlDialect::new())),
        DatabaseType::MariaDb => Ok(Arc::new(MysqlDialect::mariadb())),
        DatabaseType::ClickHouse => Ok(Arc::new(ClickHouseDialect::new())),
        other => Err(EngineError::unsupported(format!("{} has no SQL dialect", other))),
    }
}

/// The plugin serving `db_type`, sharing `manager`'s pools
pub fn plugin_for(db_type: DatabaseType, manager: Arc<ConnectionManager>) -> Result<Arc<dyn Plugin>> {
    #[cfg(feature = "redis_support")]
    if db_type == DatabaseType::Redis {
        return Ok(Arc::new(RedisPlugin::new(manager)));
    }
    #[cfg(feature = "mongodb_support")]
    if db_type == DatabaseType::MongoDb {
        return Ok(Arc::new(MongoPlugin::new(manager)));
    }
    Ok(Arc::new(SqlPlugin::new(dialect_for(db_type)?, manager)))
}
