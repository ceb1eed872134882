//! Transaction guard for a borrowed connection
//!
//! Batch chunks and plugin write paths run inside a [`TransactionGuard`]. The
//! guard borrows one native handle for the whole transaction, so every statement
//! lands on the same session.

use super::connection::{NativeConnection, QueryResult};
use super::error::{EngineError, Result};
use super::value::Value;
use tracing::warn;

const ROW_SAVEPOINT: &str = "engine_row";

/// Transaction scope over one connection.
///
/// If the guard is dropped without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback), the transaction stays open on the handle and
/// the [`ConnectionHandle`](crate::core::manager::ConnectionHandle) rolls it back
/// when it is released.
///
/// # Example
///
/// ```ignore
/// let mut tx = TransactionGuard::begin(&mut conn).await?;
/// tx.execute("UPDATE accounts SET balance = balance - ? WHERE id = ?", &[100.into(), 1.into()]).await?;
/// tx.execute("UPDATE accounts SET balance = balance + ? WHERE id = ?", &[100.into(), 2.into()]).await?;
/// tx.commit().await?;
/// ```
pub struct TransactionGuard<'c> {
    conn: &'c mut dyn NativeConnection,
    finished: bool,
}

impl<'c> TransactionGuard<'c> {
    /// Begin a new transaction
    ///
    /// # Errors
    ///
    /// Returns a transaction error if a transaction is already open or BEGIN fails
    pub async fn begin(conn: &'c mut dyn NativeConnection) -> Result<Self> {
        if conn.in_transaction() {
            return Err(EngineError::transaction("a transaction is already active"));
        }
        conn.begin()
            .await
            .map_err(|e| EngineError::transaction(format!("failed to begin transaction: {}", e)))?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// Execute a statement within the transaction
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.conn.execute(sql, params).await
    }

    /// Execute one statement under a savepoint.
    ///
    /// A failing statement is rolled back to the savepoint, so the transaction
    /// stays usable on servers that abort it on the first error. The statement's
    /// own error is returned; a failure of the savepoint commands themselves is
    /// a transaction error.
    pub async fn execute_in_savepoint(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.savepoint_command("SAVEPOINT").await?;
        match self.conn.execute(sql, params).await {
            Ok(affected) => {
                self.savepoint_command("RELEASE SAVEPOINT").await?;
                Ok(affected)
            }
            Err(e) => {
                self.savepoint_command("ROLLBACK TO SAVEPOINT").await?;
                Err(e)
            }
        }
    }

    async fn savepoint_command(&mut self, command: &str) -> Result<()> {
        self.conn
            .execute(&format!("{} {}", command, ROW_SAVEPOINT), &[])
            .await
            .map(|_| ())
            .map_err(|e| EngineError::transaction(format!("{} failed: {}", command, e)))
    }

    /// Query within the transaction
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.conn.query(sql, params).await
    }

    /// The underlying connection, for helpers that take `&mut dyn NativeConnection`
    pub fn connection(&mut self) -> &mut dyn NativeConnection {
        &mut *self.conn
    }

    /// Commit the transaction
    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.conn
            .commit()
            .await
            .map_err(|e| EngineError::transaction(format!("failed to commit transaction: {}", e)))
    }

    /// Roll the transaction back
    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn
            .rollback()
            .await
            .map_err(|e| EngineError::transaction(format!("failed to roll back transaction: {}", e)))
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                target: "transaction",
                db_type = %self.conn.database_type(),
                "TransactionGuard dropped without commit or rollback; rollback deferred to handle release"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database_types::DatabaseType;
    use async_trait::async_trait;

    #[derive(Default)]
    struct LogConn {
        log: Vec<String>,
        in_tx: bool,
    }

    #[async_trait]
    impl NativeConnection for LogConn {
        fn database_type(&self) -> DatabaseType {
            DatabaseType::Sqlite
        }
        async fn ping(&mut self) -> Result<()> {
            Ok(())
        }
        async fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<u64> {
            self.log.push(sql.to_string());
            Ok(1)
        }
        async fn query(&mut self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
            self.log.push(sql.to_string());
            Ok(QueryResult::default())
        }
        async fn begin(&mut self) -> Result<()> {
            self.in_tx = true;
            self.log.push("BEGIN".into());
            Ok(())
        }
        async fn commit(&mut self) -> Result<()> {
            self.in_tx = false;
            self.log.push("COMMIT".into());
            Ok(())
        }
        async fn rollback(&mut self) -> Result<()> {
            self.in_tx = false;
            self.log.push("ROLLBACK".into());
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            self.in_tx
        }
    }

    #[tokio::test]
    async fn test_transaction_guard_commit() {
        let mut conn = LogConn::default();
        let mut tx = TransactionGuard::begin(&mut conn).await.unwrap();
        tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(conn.log, vec!["BEGIN", "INSERT INTO t VALUES (1)", "COMMIT"]);
        assert!(!conn.in_tx);
    }

    #[tokio::test]
    async fn test_transaction_guard_explicit_rollback() {
        let mut conn = LogConn::default();
        let tx = TransactionGuard::begin(&mut conn).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(conn.log.last().map(String::as_str), Some("ROLLBACK"));
    }

    #[tokio::test]
    async fn test_drop_leaves_transaction_open_for_handle() {
        let mut conn = LogConn::default();
        {
            let _tx = TransactionGuard::begin(&mut conn).await.unwrap();
        }
        assert!(conn.in_tx);
    }

    #[tokio::test]
    async fn test_savepoint_wraps_statement() {
        let mut conn = LogConn::default();
        let mut tx = TransactionGuard::begin(&mut conn).await.unwrap();
        tx.execute_in_savepoint("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(
            conn.log,
            vec![
                "BEGIN",
                "SAVEPOINT engine_row",
                "INSERT INTO t VALUES (1)",
                "RELEASE SAVEPOINT engine_row",
                "COMMIT"
            ]
        );
    }

    #[tokio::test]
    async fn test_nested_begin_rejected() {
        let mut conn = LogConn::default();
        conn.in_tx = true;
        let err = TransactionGuard::begin(&mut conn).await.err().unwrap();
        assert!(matches!(err, EngineError::Transaction(_)));
    }
}
