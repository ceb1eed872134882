//! Core engine types and traits
//!
//! This module provides the dialect-independent building blocks: the value and
//! schema model, the plugin contract, connection management, type conversion,
//! condition building, batching and error classification.

pub mod batch;
pub mod classifier;
pub mod config;
pub mod connection;
pub mod constraints;
pub mod convert;
mod crud;
pub mod database_types;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod introspect;
pub mod manager;
pub mod model;
pub mod plugin;
pub mod query_builder;
pub mod transaction;
mod transfer;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use batch::{BatchProcessor, BatchResult};
pub use classifier::ErrorClassifier;
pub use config::{BatchConfig, ConnectionConfig, OperationContext, PluginConfig, PoolOptions};
pub use connection::{ColumnMeta, Connector, NativeConnection, QueryResult};
pub use convert::TypeConverter;
pub use database_types::DatabaseType;
pub use dialect::DialectFacts;
pub use engine::{SqlPlugin, TxFuture};
pub use error::{ConstraintKind, EngineError, ErrorKind, Result};
pub use introspect::SchemaIntrospector;
pub use manager::{ConnectionHandle, ConnectionManager};
pub use model::{
    AtomicCondition, Column, ColumnConstraints, ColumnDef, ForeignKeyRelationship, GetRowsResult,
    GraphUnit, GraphUnitRelationship, ImportMode, ImportOptions, ImportResult, Record,
    RelationshipType, SortCondition, SortDirection, StorageUnit, WhereCondition,
};
pub use plugin::{ChatProvider, Plugin, RowReader, RowWriter, RowsRequest};
pub use query_builder::{BuiltQuery, QueryBuilder, SelectOptions};
pub use transaction::TransactionGuard;
pub use types::{TypeFamily, TypeSpec};
pub use value::{Value, ValueRow};
