//! Pooled MySQL/MariaDB adapter
//!
//! Built on the pool that ships with `mysql_async`. Statements with parameters
//! use the binary protocol; parameterless statements go through the text
//! protocol so that non-preparable commands still work.

use crate::core::config::{PoolOptions, ResolvedConnection};
use crate::core::connection::{
    ColumnMeta, ConnectionPool, Connector, NativeColumn, NativeConnection, PoolStats, QueryResult,
};
use crate::core::database_types::DatabaseType;
use crate::core::error::{EngineError, Result};
use crate::core::value::Value;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Row};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Character set number MySQL reports for binary strings
const BINARY_CHARSET: u16 = 63;

static TIME_ZONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_/+:\-]+$").unwrap_or_else(|_| unreachable!()));

/// Opens [`MysqlPool`]s; also serves MariaDB
#[derive(Debug, Clone, Copy)]
pub struct MysqlConnector {
    db_type: DatabaseType,
}

impl MysqlConnector {
    pub fn new() -> Self {
        Self {
            db_type: DatabaseType::Mysql,
        }
    }

    pub fn mariadb() -> Self {
        Self {
            db_type: DatabaseType::MariaDb,
        }
    }
}

impl Default for MysqlConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    async fn connect(
        &self,
        config: &ResolvedConnection,
        options: &PoolOptions,
    ) -> Result<Arc<dyn ConnectionPool>> {
        Ok(Arc::new(MysqlPool::open(self.db_type, config, options)?))
    }
}

/// A `mysql_async` pool for one credential profile
pub struct MysqlPool {
    pool: Pool,
    db_type: DatabaseType,
    max_size: usize,
    operation_timeout: Duration,
    parse_time: bool,
}

impl MysqlPool {
    pub fn open(db_type: DatabaseType, config: &ResolvedConnection, options: &PoolOptions) -> Result<Self> {
        let max_size = options.max_size.max(1);
        let constraints = PoolConstraints::new(0, max_size)
            .ok_or_else(|| EngineError::validation(format!("invalid pool size: {}", max_size)))?;

        let mut init = Vec::new();
        if !config.loc.is_empty() && !config.loc.eq_ignore_ascii_case("local") {
            if !TIME_ZONE.is_match(&config.loc) {
                return Err(EngineError::validation(format!("invalid time zone: {}", config.loc)));
            }
            init.push(format!("SET time_zone = '{}'", config.loc));
        }
        if config.readonly {
            init.push("SET SESSION TRANSACTION READ ONLY".to_string());
        }

        let builder = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port.unwrap_or(3306))
            .user(Some(config.username.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()).filter(|d| !d.is_empty()))
            .enable_cleartext_plugin(config.allow_clear_text_passwords)
            .init(init)
            .pool_opts(PoolOpts::default().with_constraints(constraints));

        debug!(target: "mysql", host = %config.host, database = %config.database, "Created MySQL pool");
        Ok(Self {
            pool: Pool::new(builder),
            db_type,
            max_size,
            operation_timeout: options.operation_timeout,
            parse_time: config.parse_time,
        })
    }
}

#[async_trait]
impl ConnectionPool for MysqlPool {
    async fn acquire(&self) -> Result<Box<dyn NativeConnection>> {
        let conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| EngineError::connection(format!("failed to acquire connection: {}", e)))?;
        Ok(Box::new(MysqlConnection {
            conn,
            db_type: self.db_type,
            operation_timeout: self.operation_timeout,
            parse_time: self.parse_time,
            in_tx: false,
        }))
    }

    // mysql_async does not expose live pool counters
    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.max_size,
            available: self.max_size,
            waiting: 0,
        }
    }

    fn close(&self) {
        let pool = self.pool.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = pool.disconnect().await {
                    debug!(target: "mysql", error = %e, "Pool disconnect failed");
                }
            });
        }
    }
}

/// One checked-out MySQL connection
pub struct MysqlConnection {
    conn: Conn,
    db_type: DatabaseType,
    operation_timeout: Duration,
    parse_time: bool,
    in_tx: bool,
}

fn to_mysql(value: &Value) -> mysql_async::Value {
    use mysql_async::Value as M;
    match value {
        Value::Null | Value::NullOf(_) => M::NULL,
        Value::Bool(v) => M::Int(i64::from(*v)),
        Value::Int(v) => M::Int(*v),
        Value::UInt(v) => M::UInt(*v),
        Value::Float(v) => M::Double(*v),
        Value::Bytes(b) => M::Bytes(b.clone()),
        Value::Date(d) => M::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::DateTime(dt) => M::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1_000,
        ),
        Value::Time(t) => M::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        Value::TimestampTz(ts) => M::Bytes(ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string().into_bytes()),
        other => M::Bytes(other.to_display_string().into_bytes()),
    }
}

fn type_name(column: &Column) -> &'static str {
    let binary = column.character_set() == BINARY_CHARSET;
    match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY => "TINYINT",
        ColumnType::MYSQL_TYPE_SHORT => "SMALLINT",
        ColumnType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        ColumnType::MYSQL_TYPE_LONG => "INT",
        ColumnType::MYSQL_TYPE_LONGLONG => "BIGINT",
        ColumnType::MYSQL_TYPE_FLOAT => "FLOAT",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "DATE",
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "DATETIME",
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "TIME",
        ColumnType::MYSQL_TYPE_YEAR => "YEAR",
        ColumnType::MYSQL_TYPE_BIT => "BIT",
        ColumnType::MYSQL_TYPE_JSON => "JSON",
        ColumnType::MYSQL_TYPE_GEOMETRY => "GEOMETRY",
        ColumnType::MYSQL_TYPE_ENUM => "ENUM",
        ColumnType::MYSQL_TYPE_SET => "SET",
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => {
            if binary {
                "BLOB"
            } else {
                "TEXT"
            }
        }
        ColumnType::MYSQL_TYPE_VAR_STRING | ColumnType::MYSQL_TYPE_VARCHAR => {
            if binary {
                "VARBINARY"
            } else {
                "VARCHAR"
            }
        }
        ColumnType::MYSQL_TYPE_STRING => {
            if binary {
                "BINARY"
            } else {
                "CHAR"
            }
        }
        _ => "",
    }
}

impl MysqlConnection {
    fn decode(&self, value: mysql_async::Value, column: &Column) -> Value {
        use mysql_async::Value as M;
        let unsigned = column.flags().contains(ColumnFlags::UNSIGNED_FLAG);
        match value {
            M::NULL => Value::Null,
            M::Int(v) => Value::Int(v),
            M::UInt(v) => Value::UInt(v),
            M::Float(v) => Value::Float(v.into()),
            M::Double(v) => Value::Float(v),
            M::Date(y, mo, d, h, mi, s, us) => {
                let date = NaiveDate::from_ymd_opt(y.into(), mo.into(), d.into());
                let time = NaiveTime::from_hms_micro_opt(h.into(), mi.into(), s.into(), us);
                let date_only = matches!(
                    column.column_type(),
                    ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE
                );
                match (self.parse_time, date, time) {
                    (true, Some(date), Some(_)) if date_only => Value::Date(date),
                    (true, Some(date), Some(time)) => Value::DateTime(date.and_time(time)),
                    _ => Value::Text(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        y, mo, d, h, mi, s
                    )),
                }
            }
            M::Time(neg, days, h, mi, s, us) => {
                let hours = u32::from(h) + days * 24;
                match NaiveTime::from_hms_micro_opt(hours, mi.into(), s.into(), us) {
                    Some(t) if !neg && self.parse_time => Value::Time(t),
                    _ => Value::Text(format!(
                        "{}{:02}:{:02}:{:02}",
                        if neg { "-" } else { "" },
                        hours,
                        mi,
                        s
                    )),
                }
            }
            M::Bytes(bytes) => match type_name(column) {
                "BLOB" | "VARBINARY" | "BINARY" | "GEOMETRY" | "BIT" => Value::Bytes(bytes),
                "DECIMAL" => Value::Decimal(String::from_utf8_lossy(&bytes).to_string()),
                "BIGINT" if unsigned => String::from_utf8_lossy(&bytes)
                    .parse::<u64>()
                    .map(Value::UInt)
                    .unwrap_or_else(|_| Value::Text(String::from_utf8_lossy(&bytes).to_string())),
                "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                    String::from_utf8_lossy(&bytes)
                        .parse::<i64>()
                        .map(Value::Int)
                        .unwrap_or_else(|_| Value::Text(String::from_utf8_lossy(&bytes).to_string()))
                }
                "FLOAT" | "DOUBLE" => String::from_utf8_lossy(&bytes)
                    .parse::<f64>()
                    .map(Value::Float)
                    .unwrap_or_else(|_| Value::Text(String::from_utf8_lossy(&bytes).to_string())),
                _ => Value::Text(String::from_utf8_lossy(&bytes).to_string()),
            },
        }
    }

    fn decode_rows(&self, columns: Option<Arc<[Column]>>, rows: Vec<Row>) -> QueryResult {
        let columns: Vec<Column> = columns.map(|c| c.to_vec()).unwrap_or_default();
        let meta = columns
            .iter()
            .map(|c| ColumnMeta::new(c.name_str().to_string(), type_name(c)))
            .collect();
        let rows = rows
            .into_iter()
            .map(|row| {
                Row::unwrap(row)
                    .into_iter()
                    .zip(columns.iter())
                    .map(|(value, column)| self.decode(value, column))
                    .collect()
            })
            .collect();
        QueryResult { columns: meta, rows }
    }

    async fn run_control(&mut self, sql: &'static str) -> Result<()> {
        let timeout = self.operation_timeout;
        tokio::time::timeout(timeout, self.conn.query_drop(sql))
            .await
            .map_err(|_| EngineError::timeout(timeout.as_millis() as u64))?
            .map_err(EngineError::from)
    }
}

#[async_trait]
impl NativeConnection for MysqlConnection {
    fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    async fn ping(&mut self) -> Result<()> {
        let timeout = self.operation_timeout;
        tokio::time::timeout(timeout, self.conn.ping())
            .await
            .map_err(|_| EngineError::timeout(timeout.as_millis() as u64))?
            .map_err(EngineError::from)
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let timeout = self.operation_timeout;
        let fut = async {
            if params.is_empty() {
                self.conn.query_drop(sql).await?;
            } else {
                let bound = Params::Positional(params.iter().map(to_mysql).collect());
                self.conn.exec_drop(sql, bound).await?;
            }
            Ok::<_, mysql_async::Error>(self.conn.affected_rows())
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| EngineError::timeout(timeout.as_millis() as u64))?
            .map_err(EngineError::from)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let timeout = self.operation_timeout;
        let conn = &mut self.conn;
        let fut = async move {
            if params.is_empty() {
                let mut result = conn.query_iter(sql).await?;
                let columns = result.columns();
                let rows: Vec<Row> = result.collect().await?;
                Ok::<_, mysql_async::Error>((columns, rows))
            } else {
                let bound = Params::Positional(params.iter().map(to_mysql).collect());
                let mut result = conn.exec_iter(sql, bound).await?;
                let columns = result.columns();
                let rows: Vec<Row> = result.collect().await?;
                Ok((columns, rows))
            }
        };
        let (columns, rows) = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| EngineError::timeout(timeout.as_millis() as u64))?
            .map_err(EngineError::from)?;
        Ok(self.decode_rows(columns, rows))
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_tx {
            return Err(EngineError::transaction("transaction already active"));
        }
        self.run_control("START TRANSACTION").await?;
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
        let timeout = self.operation_timeout;
        let stmt = tokio::time::timeout(timeout, self.conn.prep(sql))
            .await
            .map_err(|_| EngineError::timeout(timeout.as_millis() as u64))?
            .map_err(EngineError::from)?;
        Ok(stmt
            .columns()
            .iter()
            .map(|c| NativeColumn {
                name: c.name_str().to_string(),
                type_name: type_name(c).to_string(),
                nullable: Some(!c.flags().contains(ColumnFlags::NOT_NULL_FLAG)),
                ..Default::default()
            })
            .collect())
    }
}
