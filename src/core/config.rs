//! Caller-supplied configuration
//!
//! Credential profiles, batch tuning, pool tuning and the per-call operation
//! context (cancellation and deadline). The engine consumes these; loading them
//! from files or the environment is the caller's concern.

use crate::core::database_types::DatabaseType;
use crate::core::error::{EngineError, Result};
use crate::core::model::Record;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Advanced key: port override
pub const ADV_PORT: &str = "Port";
/// Advanced key: parse DATE/DATETIME into time values (MySQL)
pub const ADV_PARSE_TIME: &str = "Parse Time";
/// Advanced key: session time zone (MySQL)
pub const ADV_LOC: &str = "Loc";
/// Advanced key: allow cleartext password plugin (MySQL)
pub const ADV_ALLOW_CLEAR_TEXT: &str = "Allow clear text passwords";
/// Advanced key: TLS mode
pub const ADV_SSL_MODE: &str = "SSL Mode";
/// Advanced key: open the store read-only
pub const ADV_READONLY: &str = "Readonly";
/// Advanced key: verbose driver logging
pub const ADV_DEBUG: &str = "Debug";
/// Advanced key: connect timeout in seconds
pub const ADV_CONNECTION_TIMEOUT: &str = "Connection Timeout";
/// Advanced key: resolve the host through a DNS seed list (MongoDB `+srv`)
pub const ADV_DNS_ENABLED: &str = "DNS Enabled";
/// Advanced key: raw query string appended to a connection URI (MongoDB)
pub const ADV_URL_PARAMS: &str = "URL Params";

const KNOWN_ADVANCED_KEYS: &[&str] = &[
    ADV_PORT,
    ADV_PARSE_TIME,
    ADV_LOC,
    ADV_ALLOW_CLEAR_TEXT,
    ADV_SSL_MODE,
    ADV_READONLY,
    ADV_DEBUG,
    ADV_CONNECTION_TIMEOUT,
    ADV_DNS_ENABLED,
    ADV_URL_PARAMS,
];

/// Default connect timeout when the profile does not set one
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(90);

/// A credential profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub db_type: DatabaseType,
    pub hostname: String,
    pub username: String,
    pub password: String,
    /// Database name, or the file path for SQLite
    pub database: String,
    /// Open-ended driver overrides
    #[serde(default)]
    pub advanced: Vec<Record>,
    /// Saved profiles may pass arbitrary extra driver parameters
    #[serde(default)]
    pub is_profile: bool,
}

impl ConnectionConfig {
    /// Create a profile for the given store
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            database: String::new(),
            advanced: Vec::new(),
            is_profile: false,
        }
    }

    /// Shorthand for a SQLite file (or `:memory:`)
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::new(DatabaseType::Sqlite).with_database(path)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.hostname = host.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Add or replace an advanced override
    pub fn with_advanced(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.advanced.retain(|r| r.key != key);
        self.advanced.push(Record::new(key, value));
        self
    }

    pub fn with_profile(mut self, is_profile: bool) -> Self {
        self.is_profile = is_profile;
        self
    }

    fn advanced_value(&self, key: &str) -> Option<&str> {
        self.advanced
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.value.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    /// Short identifier for logs: `type:host:database`, never credentials
    pub fn identifier(&self) -> String {
        format!("{}:{}:{}", self.db_type, self.hostname, self.database)
    }

    /// SHA-256 fingerprint of everything that distinguishes one native pool from
    /// another. Raw credentials are never kept as a map key.
    pub fn cache_key(&self) -> String {
        let mut parts: Vec<&str> = vec![
            self.db_type.to_str(),
            &self.hostname,
            &self.username,
            &self.password,
            &self.database,
            if self.is_profile { "true" } else { "false" },
        ];
        for adv in &self.advanced {
            parts.push(&adv.key);
            parts.push(&adv.value);
        }
        let mut hasher = Sha256::new();
        hasher.update(parts.join("\u{0}").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Resolve advanced overrides into concrete driver settings
    pub fn resolve(&self) -> Result<ResolvedConnection> {
        let port = match self.advanced_value(ADV_PORT) {
            Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
                EngineError::validation(format!("invalid port number: {}", raw))
            })?),
            None => self.db_type.default_port(),
        };

        let connect_timeout = match self.advanced_value(ADV_CONNECTION_TIMEOUT) {
            Some(raw) => Duration::from_secs(raw.trim().parse::<u64>().map_err(|_| {
                EngineError::validation(format!("invalid connection timeout: {}", raw))
            })?),
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        let extra_params = if self.is_profile {
            self.advanced
                .iter()
                .filter(|r| !KNOWN_ADVANCED_KEYS.contains(&r.key.as_str()))
                .map(|r| (r.key.clone(), r.value.clone()))
                .collect()
        } else {
            Vec::new()
        };

        Ok(ResolvedConnection {
            db_type: self.db_type,
            host: if self.hostname.is_empty() {
                "localhost".to_string()
            } else {
                self.hostname.clone()
            },
            port,
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            parse_time: self.flag(ADV_PARSE_TIME, true),
            loc: self
                .advanced_value(ADV_LOC)
                .unwrap_or("Local")
                .to_string(),
            allow_clear_text_passwords: self.flag(ADV_ALLOW_CLEAR_TEXT, false),
            ssl_mode: self.advanced_value(ADV_SSL_MODE).map(str::to_string),
            readonly: self.flag(ADV_READONLY, false),
            debug: self.flag(ADV_DEBUG, false),
            connect_timeout,
            dns_seed_list: self.flag(ADV_DNS_ENABLED, false),
            url_params: self
                .advanced_value(ADV_URL_PARAMS)
                .unwrap_or_default()
                .to_string(),
            extra_params,
        })
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.advanced_value(key)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
            .unwrap_or(default)
    }
}

/// Concrete connection settings after advanced overrides are applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConnection {
    pub db_type: DatabaseType,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub database: String,
    pub parse_time: bool,
    pub loc: String,
    pub allow_clear_text_passwords: bool,
    pub ssl_mode: Option<String>,
    pub readonly: bool,
    pub debug: bool,
    pub connect_timeout: Duration,
    /// Resolve the host as a DNS seed list instead of dialing host:port
    pub dns_seed_list: bool,
    /// Raw `?key=value` suffix for URI-configured drivers
    pub url_params: String,
    /// Extra driver parameters, only populated for saved profiles
    pub extra_params: Vec<(String, String)>,
}

/// Chunking policy for bulk work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Upper bound on rows per chunk
    pub batch_size: usize,
    /// Prefer one multi-row statement per chunk
    pub use_bulk_insert: bool,
    /// Abort (and roll back the chunk) on the first failing row
    pub fail_on_error: bool,
    /// Emit a progress line per chunk
    pub log_progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            use_bulk_insert: true,
            fail_on_error: true,
            log_progress: false,
        }
    }
}

impl BatchConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_bulk_insert(mut self, enabled: bool) -> Self {
        self.use_bulk_insert = enabled;
        self
    }

    pub fn with_fail_on_error(mut self, enabled: bool) -> Self {
        self.fail_on_error = enabled;
        self
    }

    pub fn with_log_progress(mut self, enabled: bool) -> Self {
        self.log_progress = enabled;
        self
    }

    /// Rows per chunk for `column_count` bound columns under a dialect limit of
    /// `max_parameters`: `max(1, min(batch_size, floor(0.9 * max / columns)))`.
    pub fn effective_batch_size(&self, max_parameters: usize, column_count: usize) -> usize {
        let configured = self.batch_size.max(1);
        if column_count == 0 || max_parameters == 0 {
            return configured;
        }
        let by_params = (max_parameters * 9 / 10) / column_count;
        configured.min(by_params).max(1)
    }
}

/// Connection Manager tuning
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Handles per native pool
    pub max_size: usize,
    /// Wait for a free handle at most this long
    pub acquire_timeout: Duration,
    /// Driver-side cap on one statement; whole operations are bounded only by
    /// the caller's deadline
    pub operation_timeout: Duration,
    /// Drop pools unused for this long
    pub idle_ttl: Duration,
    /// Upper bound on cached pools
    pub max_cached_pools: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            idle_ttl: Duration::from_secs(5 * 60),
            max_cached_pools: 50,
        }
    }
}

impl PoolOptions {
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    pub fn with_max_cached_pools(mut self, max: usize) -> Self {
        self.max_cached_pools = max;
        self
    }
}

/// Cancellation signal and optional deadline for one inbound call
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OperationContext {
    /// No deadline, not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Attach a caller-owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the deadline, `None` if unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Run `fut` until it completes, the context is cancelled, or the deadline
    /// elapses. Without a deadline only cancellation stops it. The future is
    /// dropped on cancellation or timeout, which aborts the in-flight driver call.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let Some(budget) = self.remaining() else {
            return tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
                res = fut => res,
            };
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            res = tokio::time::timeout(budget, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(EngineError::timeout(budget.as_millis() as u64)),
            },
        }
    }
}

/// Everything an inbound call carries besides its arguments
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub connection: ConnectionConfig,
    pub context: OperationContext,
}

impl PluginConfig {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            context: OperationContext::new(),
        }
    }

    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }
}
