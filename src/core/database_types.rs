//! Backing store kinds
//!
//! Identifies which dialect adapter a credential profile targets.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported backing stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseType {
    /// PostgreSQL
    Postgres,
    /// MySQL
    Mysql,
    /// MariaDB (MySQL wire protocol and catalog)
    MariaDb,
    /// SQLite 3
    Sqlite,
    /// Redis key-value store
    Redis,
    /// MongoDB document store
    MongoDb,
    /// ClickHouse column store (SQL without transactions)
    ClickHouse,
}

impl DatabaseType {
    /// Canonical lowercase name
    pub fn to_str(&self) -> &'static str {
        match self {
            DatabaseType::Postgres => "postgres",
            DatabaseType::Mysql => "mysql",
            DatabaseType::MariaDb => "mariadb",
            DatabaseType::Sqlite => "sqlite",
            DatabaseType::Redis => "redis",
            DatabaseType::MongoDb => "mongodb",
            DatabaseType::ClickHouse => "clickhouse",
        }
    }

    /// Check if this store speaks SQL
    pub fn is_sql(&self) -> bool {
        !matches!(self, DatabaseType::Redis | DatabaseType::MongoDb)
    }

    /// Check if this store is a key-value store
    pub fn is_key_value(&self) -> bool {
        matches!(self, DatabaseType::Redis)
    }

    /// Check if this store keeps schemaless documents
    pub fn is_document(&self) -> bool {
        matches!(self, DatabaseType::MongoDb)
    }

    /// Check if this store supports SQL transactions
    pub fn supports_transactions(&self) -> bool {
        self.is_sql() && *self != DatabaseType::ClickHouse
    }

    /// Default network port, `None` for file-based stores
    pub fn default_port(&self) -> Option<u16> {
        match self {
            DatabaseType::Postgres => Some(5432),
            DatabaseType::Mysql | DatabaseType::MariaDb => Some(3306),
            DatabaseType::Redis => Some(6379),
            DatabaseType::MongoDb => Some(27017),
            DatabaseType::ClickHouse => Some(9000),
            DatabaseType::Sqlite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            "mysql" => Ok(DatabaseType::Mysql),
            "mariadb" => Ok(DatabaseType::MariaDb),
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            "redis" => Ok(DatabaseType::Redis),
            "mongodb" | "mongo" => Ok(DatabaseType::MongoDb),
            "clickhouse" => Ok(DatabaseType::ClickHouse),
            _ => Err(format!("Invalid database type: '{}'", s)),
        }
    }
}
