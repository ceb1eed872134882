//! Error types for the dialect engine
//!
//! Every fallible operation returns [`EngineError`]. Driver failures enter as the
//! feature-gated `#[from]` variants and are mapped onto the user-facing taxonomy
//! ([`ErrorKind`]) by the [`ErrorClassifier`](crate::core::classifier::ErrorClassifier).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// User-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    ConstraintViolation,
    ConnectionError,
    TimeoutError,
    PermissionError,
    TransactionError,
    UnhandledError,
}

impl ErrorKind {
    /// Stable name of the bucket
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::ConstraintViolation => "ConstraintViolation",
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::PermissionError => "PermissionError",
            ErrorKind::TransactionError => "TransactionError",
            ErrorKind::UnhandledError => "UnhandledError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which integrity constraint a write violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    Duplicate,
    ForeignKey,
    Check,
    NotNull,
}

/// Error types for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Requested object or row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied something the engine refuses (bad operator, arity, missing field)
    #[error("{0}")]
    Validation(String),

    /// A textual value could not be converted to the column's native type
    #[error("cannot convert '{value}' to {target_type}: {reason}")]
    Conversion {
        value: String,
        target_type: String,
        reason: String,
    },

    /// Duplicate key, foreign key, check or not-null violation
    #[error("{message}")]
    ConstraintViolation {
        constraint: ConstraintKind,
        message: String,
    },

    /// Opening, pinging or using a connection failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Deadline elapsed before the operation completed
    #[error("{0}")]
    Timeout(String),

    /// Caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Insufficient privileges
    #[error("permission denied: {0}")]
    Permission(String),

    /// Transaction could not begin, commit or roll back
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Statement execution failed (not yet classified)
    #[error("query error: {0}")]
    Query(String),

    /// The backing store cannot perform this operation
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Sanitized passthrough for anything the classifier did not recognise
    #[error("database operation failed: {0}")]
    Unhandled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    #[cfg(feature = "redis_support")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[cfg(feature = "mongodb_support")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
}

impl EngineError {
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        EngineError::NotFound(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn conversion(
        value: impl Into<String>,
        target_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::Conversion {
            value: value.into(),
            target_type: target_type.into(),
            reason: reason.into(),
        }
    }

    pub fn constraint(constraint: ConstraintKind, message: impl Into<String>) -> Self {
        EngineError::ConstraintViolation {
            constraint,
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        EngineError::Connection(msg.into())
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        EngineError::Timeout(format!("operation timed out after {}ms", timeout_ms))
    }

    pub fn permission<S: Into<String>>(msg: S) -> Self {
        EngineError::Permission(msg.into())
    }

    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        EngineError::Transaction(msg.into())
    }

    pub fn query<S: Into<String>>(msg: S) -> Self {
        EngineError::Query(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        EngineError::Unsupported(msg.into())
    }

    pub fn unhandled<S: Into<String>>(msg: S) -> Self {
        EngineError::Unhandled(msg.into())
    }

    /// Taxonomy bucket of this error.
    ///
    /// Raw driver and query errors report `UnhandledError` until they have been
    /// passed through the classifier.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Validation(_)
            | EngineError::Conversion { .. }
            | EngineError::Unsupported(_) => ErrorKind::ValidationError,
            EngineError::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            EngineError::Connection(_) => ErrorKind::ConnectionError,
            EngineError::Timeout(_) | EngineError::Cancelled => ErrorKind::TimeoutError,
            EngineError::Permission(_) => ErrorKind::PermissionError,
            EngineError::Transaction(_) => ErrorKind::TransactionError,
            _ => ErrorKind::UnhandledError,
        }
    }

    /// Whether this error came straight from a driver or statement and still
    /// needs classification
    pub fn is_raw(&self) -> bool {
        match self {
            EngineError::Query(_) | EngineError::Io(_) | EngineError::Json(_) => true,
            #[cfg(feature = "sqlite")]
            EngineError::Sqlite(_) => true,
            #[cfg(feature = "postgres")]
            EngineError::Postgres(_) => true,
            #[cfg(feature = "mysql")]
            EngineError::Mysql(_) => true,
            #[cfg(feature = "redis_support")]
            EngineError::Redis(_) => true,
            #[cfg(feature = "mongodb_support")]
            EngineError::Mongo(_) => true,
            _ => false,
        }
    }

    /// SQLSTATE reported by the driver, when it carries one
    pub fn sql_state(&self) -> Option<String> {
        match self {
            #[cfg(feature = "postgres")]
            EngineError::Postgres(e) => e.code().map(|c| c.code().to_string()),
            #[cfg(feature = "mysql")]
            EngineError::Mysql(mysql_async::Error::Server(e)) => Some(e.state.clone()),
            _ => None,
        }
    }

    /// Vendor error number reported by the driver, when it carries one
    pub fn vendor_code(&self) -> Option<i64> {
        match self {
            #[cfg(feature = "sqlite")]
            EngineError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                Some(i64::from(e.extended_code))
            }
            #[cfg(feature = "mysql")]
            EngineError::Mysql(mysql_async::Error::Server(e)) => Some(i64::from(e.code)),
            #[cfg(feature = "mongodb_support")]
            EngineError::Mongo(e) => match e.kind.as_ref() {
                mongodb::error::ErrorKind::Command(c) => Some(i64::from(c.code)),
                mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(w)) => {
                    Some(i64::from(w.code))
                }
                _ => None,
            },
            _ => None,
        }
    }
}
