//! Native connection traits
//!
//! Every backend adapter exposes its driver through these three traits. The
//! generic engine only ever talks to [`NativeConnection`]; pools are created by
//! a [`Connector`] and cached by the
//! [`ConnectionManager`](crate::core::manager::ConnectionManager).

use super::config::{PoolOptions, ResolvedConnection};
use super::database_types::DatabaseType;
use super::error::{EngineError, Result};
use super::value::{Value, ValueRow};
use async_trait::async_trait;
use std::sync::Arc;

/// Name and driver-reported type of a result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    /// Declared or wire type as the driver reports it, uppercase
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Result set of a statement, decoded into tagged values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<ValueRow>,
}

impl QueryResult {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by name (case-insensitive)
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Display string of cell `(row, col)`, empty when out of range or NULL
    pub fn text(&self, row: usize, col: usize) -> String {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(Value::to_display_string)
            .unwrap_or_default()
    }
}

/// Column facts reported by a driver's own statement description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeColumn {
    pub name: String,
    /// Declared type, not yet normalized
    pub type_name: String,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: Option<bool>,
}

/// One live handle to a backing store
#[async_trait]
pub trait NativeConnection: Send {
    /// Backing store kind
    fn database_type(&self) -> DatabaseType;

    /// Cheap liveness check
    async fn ping(&mut self) -> Result<()>;

    /// Run a statement and return the number of affected rows
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a statement and decode its result set
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Whether a transaction opened through [`begin`](Self::begin) is still open
    fn in_transaction(&self) -> bool;

    /// Ordered column facts from the driver's statement description.
    ///
    /// Adapters without such a facility keep the default, and the introspector
    /// falls back to catalog queries.
    async fn describe_table(&mut self, full_table_name: &str) -> Result<Vec<NativeColumn>> {
        Err(EngineError::unsupported(format!(
            "describe_table is not available for {} ({})",
            self.database_type(),
            full_table_name
        )))
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of connections in the pool
    pub size: usize,
    /// Number of idle connections
    pub available: usize,
    /// Number of callers waiting for a connection
    pub waiting: usize,
}

impl PoolStats {
    /// No handle is checked out
    pub fn is_idle(&self) -> bool {
        self.available >= self.size && self.waiting == 0
    }
}

/// A pool of native handles for one credential profile
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Check out a handle; it returns to the pool when dropped
    async fn acquire(&self) -> Result<Box<dyn NativeConnection>>;

    fn stats(&self) -> PoolStats;

    /// Stop handing out handles and drop idle ones
    fn close(&self);
}

/// Opens pools for one backing store kind
#[async_trait]
pub trait Connector: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    async fn connect(
        &self,
        config: &ResolvedConnection,
        options: &PoolOptions,
    ) -> Result<Arc<dyn ConnectionPool>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_result_lookup() {
        let result = QueryResult {
            columns: vec![ColumnMeta::new("id", "INTEGER"), ColumnMeta::new("Name", "TEXT")],
            rows: vec![vec![Value::Int(1), Value::Null]],
        };
        assert_eq!(result.column_index("name"), Some(1));
        assert_eq!(result.text(0, 0), "1");
        assert_eq!(result.text(0, 1), "");
        assert_eq!(result.text(3, 0), "");
    }

    #[test]
    fn test_pool_stats_idle() {
        let stats = PoolStats {
            size: 2,
            available: 2,
            waiting: 0,
        };
        assert!(stats.is_idle());
        let stats = PoolStats {
            size: 2,
            available: 1,
            waiting: 0,
        };
        assert!(!stats.is_idle());
    }
}
