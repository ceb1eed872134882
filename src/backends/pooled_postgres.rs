//! Pooled PostgreSQL adapter
//!
//! Handles come from a `deadpool-postgres` pool. Parameters are sent in text
//! format so the server infers their types from the statement; results are
//! decoded by wire type name.

use crate::core::config::{PoolOptions, ResolvedConnection};
use crate::core::connection::{
    ColumnMeta, ConnectionPool, Connector, NativeColumn, NativeConnection, PoolStats, QueryResult,
};
use crate::core::database_types::DatabaseType;
use crate::core::error::{EngineError, Result};
use crate::core::value::Value;
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::{to_sql_checked, Format, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{NoTls, Row};
use tracing::debug;

/// Opens [`PostgresPool`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

#[async_trait]
impl Connector for PostgresConnector {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(
        &self,
        config: &ResolvedConnection,
        options: &PoolOptions,
    ) -> Result<Arc<dyn ConnectionPool>> {
        Ok(Arc::new(PostgresPool::open(config, options)?))
    }
}

/// A pool of PostgreSQL clients for one credential profile
pub struct PostgresPool {
    pool: Pool,
    operation_timeout: Duration,
}

impl PostgresPool {
    /// Build the pool; connections are opened lazily on first acquire
    pub fn open(config: &ResolvedConnection, options: &PoolOptions) -> Result<Self> {
        if let Some(mode) = config.ssl_mode.as_deref() {
            if !matches!(mode.to_lowercase().as_str(), "disable" | "disabled" | "allow" | "prefer") {
                return Err(EngineError::validation(format!(
                    "SSL mode '{}' is not available in this build",
                    mode
                )));
            }
        }

        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = config.port;
        cfg.user = Some(config.username.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone()).filter(|d| !d.is_empty());
        cfg.connect_timeout = Some(config.connect_timeout);
        if !config.extra_params.is_empty() {
            let options: Vec<String> = config
                .extra_params
                .iter()
                .map(|(k, v)| format!("-c {}={}", k, v))
                .collect();
            cfg.options = Some(options.join(" "));
        }
        if config.readonly {
            let readonly = "-c default_transaction_read_only=on".to_string();
            cfg.options = Some(match cfg.options.take() {
                Some(existing) => format!("{} {}", existing, readonly),
                None => readonly,
            });
        }
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(options.max_size.max(1)));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| EngineError::connection(format!("failed to create pool: {}", e)))?;
        debug!(target: "postgres", host = %config.host, database = %config.database, "Created PostgreSQL pool");
        Ok(Self {
            pool,
            operation_timeout: options.operation_timeout,
        })
    }
}

#[async_trait]
impl ConnectionPool for PostgresPool {
    async fn acquire(&self) -> Result<Box<dyn NativeConnection>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| EngineError::connection(format!("failed to acquire connection: {}", e)))?;
        Ok(Box::new(PostgresConnection {
            client,
            operation_timeout: self.operation_timeout,
            in_tx: false,
        }))
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

/// A parameter bound in text format; the server parses it as the inferred type
#[derive(Debug)]
struct TextParam(Option<String>);

impl ToSql for TextParam {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
        match &self.0 {
            Some(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// Undecoded column bytes, for types read by hand
struct RawBytes(Vec<u8>);

impl<'a> FromSql<'a> for RawBytes {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawBytes(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// PostgreSQL text input form of a value
fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::NullOf(_) => None,
        Value::Bool(v) => Some(if *v { "t" } else { "f" }.to_string()),
        Value::Bytes(b) => Some(format!("\\x{}", hex::encode(b))),
        Value::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
        Value::Array(items) => Some(array_literal(items)),
        other => Some(other.to_display_string()),
    }
}

/// `{"a","b",NULL}` array input literal
fn array_literal(items: &[Value]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|item| match to_text(item) {
            Some(text) => format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\"")),
            None => "NULL".to_string(),
        })
        .collect();
    format!("{{{}}}", elements.join(","))
}

/// Text form of the binary NUMERIC representation
fn decode_numeric(raw: &[u8]) -> Option<String> {
    if raw.len() < 8 {
        return None;
    }
    let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
    let ndigits = word(0) as usize;
    let weight = word(2) as i16 as i32;
    let sign = word(4);
    let dscale = word(6) as usize;
    match sign {
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return None;
    }
    let digit = |k: i32| -> u16 {
        if k < 0 || k as usize >= ndigits {
            0
        } else {
            word(8 + k as usize * 2)
        }
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for k in 1..=weight {
            out.push_str(&format!("{:04}", digit(k)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut k = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(k)));
            k += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Some(out)
}

fn format_uuid(raw: &[u8]) -> String {
    let h = hex::encode(raw);
    if h.len() != 32 {
        return h;
    }
    format!("{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32])
}

fn array_of<'a, T>(row: &'a Row, idx: usize, wrap: fn(T) -> Value) -> std::result::Result<Value, tokio_postgres::Error>
where
    T: FromSql<'a>,
{
    Ok(match row.try_get::<_, Option<Vec<Option<T>>>>(idx)? {
        Some(items) => Value::Array(
            items
                .into_iter()
                .map(|item| item.map(wrap).unwrap_or(Value::Null))
                .collect(),
        ),
        None => Value::Null,
    })
}

fn opt<T>(value: Option<T>, wrap: impl FnOnce(T) -> Value) -> Value {
    value.map(wrap).unwrap_or(Value::Null)
}

fn decode_cell(row: &Row, idx: usize, ty: &Type) -> std::result::Result<Value, tokio_postgres::Error> {
    Ok(match ty.name() {
        "bool" => opt(row.try_get::<_, Option<bool>>(idx)?, Value::Bool),
        "int2" => opt(row.try_get::<_, Option<i16>>(idx)?, |v| Value::Int(v.into())),
        "int4" => opt(row.try_get::<_, Option<i32>>(idx)?, |v| Value::Int(v.into())),
        "int8" => opt(row.try_get::<_, Option<i64>>(idx)?, Value::Int),
        "oid" => opt(row.try_get::<_, Option<u32>>(idx)?, |v| Value::UInt(v.into())),
        "float4" => opt(row.try_get::<_, Option<f32>>(idx)?, |v| Value::Float(v.into())),
        "float8" => opt(row.try_get::<_, Option<f64>>(idx)?, Value::Float),
        "text" | "varchar" | "bpchar" | "name" | "citext" | "unknown" => {
            opt(row.try_get::<_, Option<String>>(idx)?, Value::Text)
        }
        "bytea" => opt(row.try_get::<_, Option<Vec<u8>>>(idx)?, Value::Bytes),
        "date" => opt(row.try_get::<_, Option<NaiveDate>>(idx)?, Value::Date),
        "timestamp" => opt(row.try_get::<_, Option<NaiveDateTime>>(idx)?, Value::DateTime),
        "timestamptz" => opt(row.try_get::<_, Option<DateTime<Utc>>>(idx)?, |v| {
            Value::TimestampTz(DateTime::<FixedOffset>::from(v))
        }),
        "time" => opt(row.try_get::<_, Option<NaiveTime>>(idx)?, Value::Time),
        "json" | "jsonb" => opt(row.try_get::<_, Option<serde_json::Value>>(idx)?, Value::Json),
        "_text" | "_varchar" | "_bpchar" => array_of::<String>(row, idx, Value::Text)?,
        "_int4" => array_of::<i32>(row, idx, |v| Value::Int(v.into()))?,
        "_int8" => array_of::<i64>(row, idx, Value::Int)?,
        "_bool" => array_of::<bool>(row, idx, Value::Bool)?,
        "_float8" => array_of::<f64>(row, idx, Value::Float)?,
        "numeric" => opt(row.try_get::<_, Option<RawBytes>>(idx)?, |raw| {
            decode_numeric(&raw.0).map(Value::Decimal).unwrap_or(Value::Bytes(raw.0))
        }),
        "uuid" => opt(row.try_get::<_, Option<RawBytes>>(idx)?, |raw| Value::Uuid(format_uuid(&raw.0))),
        _ => match ty.kind() {
            // enum labels travel as their text
            Kind::Enum(_) => opt(row.try_get::<_, Option<RawBytes>>(idx)?, |raw| {
                Value::Text(String::from_utf8_lossy(&raw.0).to_string())
            }),
            _ => opt(row.try_get::<_, Option<RawBytes>>(idx)?, |raw| Value::Bytes(raw.0)),
        },
    })
}

/// One checked-out PostgreSQL client
pub struct PostgresConnection {
    client: Object,
    operation_timeout: Duration,
    in_tx: bool,
}

impl PostgresConnection {
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, tokio_postgres::Error>>,
    {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| EngineError::timeout(self.operation_timeout.as_millis() as u64))?
            .map_err(EngineError::from)
    }

    async fn run_control(&mut self, sql: &str) -> Result<()> {
        self.bounded(self.client.batch_execute(sql)).await
    }
}

fn bind(params: &[Value]) -> Vec<TextParam> {
    params.iter().map(|v| TextParam(to_text(v))).collect()
}

fn refs(params: &[TextParam]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl NativeConnection for PostgresConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn ping(&mut self) -> Result<()> {
        self.run_control("SELECT 1").await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let bound = bind(params);
        let stmt = self.bounded(self.client.prepare_cached(sql)).await?;
        self.bounded(self.client.execute(&stmt, &refs(&bound))).await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let bound = bind(params);
        let stmt = self.bounded(self.client.prepare_cached(sql)).await?;
        let rows = self.bounded(self.client.query(&stmt, &refs(&bound))).await?;

        let columns: Vec<ColumnMeta> = stmt
            .columns()
            .iter()
            .map(|c| ColumnMeta::new(c.name(), c.type_().name().to_uppercase()))
            .collect();
        let types: Vec<Type> = stmt.columns().iter().map(|c| c.type_().clone()).collect();
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let values = types
                .iter()
                .enumerate()
                .map(|(i, ty)| decode_cell(row, i, ty))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            out.push(values);
        }
        Ok(QueryResult { columns, rows: out })
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
        let stmt = self.bounded(self.client.prepare(&sql)).await?;
        Ok(stmt
            .columns()
            .iter()
            .map(|c| NativeColumn {
                name: c.name().to_string(),
                type_name: c.type_().name().to_uppercase(),
                ..Default::default()
            })
            .collect())
    }
}
