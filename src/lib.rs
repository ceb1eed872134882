//! # Rust Dialect Engine
//!
//! A multi-dialect data-access engine: one plugin contract in front of
//! PostgreSQL, MySQL/MariaDB, SQLite, Redis and MongoDB, with live schema
//! introspection, typed WHERE building, dialect-aware type conversion and
//! parameter-limit-aware batching.
//!
//! ## Features
//!
//! - **One contract**: every store is reached through [`Plugin`]
//! - **Typed values**: [`Value`] keeps bound parameters tagged with their family
//! - **Pooled connections**: one pool per credential fingerprint, reused and health-checked
//! - **Cancellation**: every operation races an optional deadline and `CancellationToken`
//! - **Error taxonomy**: driver errors are classified and sanitized before they surface
//!
//! ## Supported Databases
//!
//! | Database | Feature | Driver |
//! |----------|---------|--------|
//! | SQLite | `sqlite` (default) | rusqlite + deadpool-sqlite |
//! | PostgreSQL | `postgres` | tokio-postgres + deadpool-postgres |
//! | MySQL / MariaDB | `mysql` | mysql_async |
//! | Redis | `redis_support` | redis |
//! | MongoDB | `mongodb_support` | mongodb |
//!
//! ClickHouse ships as dialect facts only ([`backends::ClickHouseDialect`]);
//! register a [`core::Connector`] for it to reach a live server.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! rust_dialect_engine = { version = "0.1", features = ["sqlite"] }
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ```rust,no_run
//! use rust_dialect_engine::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = Arc::new(default_manager(PoolOptions::default()));
//!     let plugin = plugin_for(DatabaseType::Sqlite, manager)?;
//!     let config = PluginConfig::new(ConnectionConfig::sqlite("app.db"));
//!
//!     plugin
//!         .add_storage_unit(
//!             &config,
//!             "",
//!             "users",
//!             &[
//!                 Record::new("id", "INTEGER").with_extra("Primary", "true"),
//!                 Record::new("name", "TEXT"),
//!             ],
//!         )
//!         .await?;
//!     plugin
//!         .add_row(&config, "", "users", &[Record::new("id", "1"), Record::new("name", "Alice")])
//!         .await?;
//!
//!     let filter = WhereCondition::atomic("name", "=", "Alice", "TEXT");
//!     let page = plugin
//!         .get_rows(&config, "", "users", &RowsRequest::page(50, 0).with_condition(filter))
//!         .await?;
//!     println!("{:?}", page.rows);
//!     Ok(())
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! rust_dialect_engine/
//! ├── src/
//! │   ├── core/              # Dialect-independent engine
//! │   │   ├── plugin.rs      # Plugin contract
//! │   │   ├── engine.rs      # Generic SQL plugin
//! │   │   ├── manager.rs     # Connection manager
//! │   │   ├── convert.rs     # Type conversion
//! │   │   ├── introspect.rs  # Schema introspection
//! │   │   ├── query_builder.rs # WHERE builder
//! │   │   ├── batch.rs       # Batch processor
//! │   │   ├── classifier.rs  # Error classifier
//! │   │   └── ...
//! │   ├── backends/          # Dialect facts and driver adapters
//! │   └── lib.rs
//! ├── tests/                 # Integration and property tests
//! └── benches/               # Criterion benchmarks
//! ```

/// Dialect-independent engine types and traits
pub mod core;

/// Dialect facts and driver adapters
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_dialect_engine::prelude::*;
///
/// let config = PluginConfig::new(ConnectionConfig::sqlite(":memory:"));
/// assert_eq!(config.connection.db_type, DatabaseType::Sqlite);
/// ```
pub mod prelude {
    pub use crate::backends::{default_manager, dialect_for, plugin_for};
    pub use crate::core::{
        BatchConfig, Column, ConnectionConfig, ConnectionManager, DatabaseType, EngineError,
        ErrorKind, GetRowsResult, ImportMode, ImportOptions, OperationContext, Plugin, PluginConfig,
        PoolOptions, Record, Result, RowsRequest, SortCondition, SqlPlugin, StorageUnit, Value,
        WhereCondition,
    };
}

// Re-export at root level for convenience
pub use crate::backends::{default_manager, plugin_for};
pub use crate::core::{
    ConnectionConfig, ConnectionManager, DatabaseType, EngineError, ErrorKind, Plugin, PluginConfig,
    Result, SqlPlugin, Value,
};
