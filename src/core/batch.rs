//! Batch processor
//!
//! Large insert/update/delete workloads are cut into chunks sized against the
//! dialect's bound-parameter ceiling. A chunk is the unit of atomicity: the
//! multi-row path sends one statement per chunk, the row-by-row path wraps each
//! chunk in its own transaction. No transaction outlives a chunk.

use super::config::BatchConfig;
use super::connection::{NativeConnection, QueryResult};
use super::convert::TypeConverter;
use super::error::{EngineError, Result};
use super::query_builder::{QueryBuilder, SelectOptions};
use super::transaction::TransactionGuard;
use super::value::{Value, ValueRow};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Outcome of a batch operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Rows (or conditions) that succeeded
    pub processed: u64,
    /// Rows skipped after a failure when `fail_on_error` is off
    pub failed: u64,
    /// Chunks or pages handled
    pub batches: u64,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Chunked bulk operations for one dialect
pub struct BatchProcessor<'a> {
    builder: QueryBuilder<'a>,
    config: BatchConfig,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(converter: &'a TypeConverter, config: BatchConfig) -> Self {
        Self {
            builder: QueryBuilder::new(converter),
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Rows per chunk for `column_count` bound values per row
    pub fn effective_batch_size(&self, column_count: usize) -> usize {
        self.config
            .effective_batch_size(self.builder.dialect().max_parameters(), column_count)
    }

    fn log_chunk(&self, operation: &str, table: &str, done: usize, total: usize) {
        if self.config.log_progress {
            info!(
                target: "batch",
                operation,
                table,
                progress = %format!("{}/{}", done, total),
                "Batch progress"
            );
        }
    }

    /// One row-level statement inside a chunk transaction. Tolerated failures
    /// are isolated under a savepoint so later rows of the chunk still apply.
    async fn execute_row(&self, tx: &mut TransactionGuard<'_>, sql: &str, params: &[Value]) -> Result<u64> {
        if !self.config.fail_on_error && self.builder.dialect().supports_savepoints() {
            tx.execute_in_savepoint(sql, params).await
        } else {
            tx.execute(sql, params).await
        }
    }

    /// Whether a row failure ends the chunk: always with `fail_on_error`, and
    /// when the transaction itself is no longer usable
    fn aborts_chunk(&self, err: &EngineError) -> bool {
        self.config.fail_on_error || matches!(err, EngineError::Transaction(_))
    }

    /// Insert `rows` into `full_table`.
    ///
    /// With bulk insert on, each chunk is one multi-row `INSERT`. Otherwise each
    /// chunk runs row by row inside a transaction; with `fail_on_error` the
    /// first failure rolls the chunk back and aborts, without it each failed
    /// row is undone to its savepoint and skipped.
    pub async fn insert_batch(
        &self,
        conn: &mut dyn NativeConnection,
        full_table: &str,
        columns: &[String],
        rows: &[ValueRow],
    ) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        if rows.is_empty() {
            return Ok(result);
        }
        let chunk_size = self.effective_batch_size(columns.len());
        let bulk = self.config.use_bulk_insert && self.builder.dialect().supports_bulk_insert();
        debug!(
            target: "batch",
            table = full_table,
            rows = rows.len(),
            chunk_size,
            bulk,
            "Starting batch insert"
        );

        let mut done = 0;
        for chunk in rows.chunks(chunk_size) {
            if bulk {
                let query = self.builder.insert_query(full_table, columns, chunk)?;
                match conn.execute(&query.sql, &query.params).await {
                    Ok(_) => result.processed += chunk.len() as u64,
                    Err(e) if self.config.fail_on_error => {
                        error!(
                            target: "batch",
                            table = full_table,
                            batch = result.batches,
                            rows = chunk.len(),
                            error = %e,
                            "Batch insert failed"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(target: "batch", table = full_table, batch = result.batches, error = %e, "Skipping failed chunk");
                        result.failed += chunk.len() as u64;
                    }
                }
            } else {
                let mut tx = TransactionGuard::begin(conn).await?;
                let mut chunk_result = BatchResult::default();
                for row in chunk {
                    let query = self
                        .builder
                        .insert_query(full_table, columns, std::slice::from_ref(row))?;
                    match self.execute_row(&mut tx, &query.sql, &query.params).await {
                        Ok(_) => chunk_result.processed += 1,
                        Err(e) if self.aborts_chunk(&e) => {
                            tx.rollback().await?;
                            return Err(chunk_error("insert", result.batches, e));
                        }
                        Err(e) => {
                            warn!(target: "batch", table = full_table, error = %e, "Failed to insert row, continuing");
                            chunk_result.failed += 1;
                        }
                    }
                }
                tx.commit().await?;
                result.processed += chunk_result.processed;
                result.failed += chunk_result.failed;
            }
            result.batches += 1;
            done += chunk.len();
            self.log_chunk("insert", full_table, done, rows.len());
        }

        if self.config.log_progress {
            info!(target: "batch", table = full_table, inserted = result.processed, "Batch insert completed");
        }
        Ok(result)
    }

    /// Update rows matched by `key_column`, which is removed from the SET list
    pub async fn update_batch(
        &self,
        conn: &mut dyn NativeConnection,
        full_table: &str,
        rows: &[Vec<(String, Value)>],
        key_column: &str,
    ) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        if rows.is_empty() {
            return Ok(result);
        }
        let widest = rows.iter().map(Vec::len).max().unwrap_or(1);
        let chunk_size = self.effective_batch_size(widest);

        let mut done = 0;
        for chunk in rows.chunks(chunk_size) {
            let mut tx = TransactionGuard::begin(conn).await?;
            for row in chunk {
                let Some(key_value) = row.iter().find(|(c, _)| c == key_column).map(|(_, v)| v.clone()) else {
                    if self.config.fail_on_error {
                        tx.rollback().await?;
                        return Err(EngineError::validation(format!(
                            "key column {} not found in update record",
                            key_column
                        )));
                    }
                    result.failed += 1;
                    continue;
                };
                let set: Vec<(String, Value)> = row.iter().filter(|(c, _)| c != key_column).cloned().collect();
                if set.is_empty() {
                    continue;
                }
                let query = self
                    .builder
                    .update_query(full_table, &set, &[(key_column.to_string(), key_value)])?;
                match self.execute_row(&mut tx, &query.sql, &query.params).await {
                    Ok(affected) => result.processed += affected,
                    Err(e) if self.aborts_chunk(&e) => {
                        tx.rollback().await?;
                        return Err(chunk_error("update", result.batches, e));
                    }
                    Err(e) => {
                        warn!(target: "batch", table = full_table, key = key_column, error = %e, "Failed to update record, continuing");
                        result.failed += 1;
                    }
                }
            }
            tx.commit().await?;
            result.batches += 1;
            done += chunk.len();
            self.log_chunk("update", full_table, done, rows.len());
        }

        if self.config.log_progress {
            info!(target: "batch", table = full_table, updated = result.processed, "Batch update completed");
        }
        Ok(result)
    }

    /// Delete rows matching each equality condition set
    pub async fn delete_batch(
        &self,
        conn: &mut dyn NativeConnection,
        full_table: &str,
        conditions: &[Vec<(String, Value)>],
    ) -> Result<BatchResult> {
        let mut result = BatchResult::default();
        if conditions.is_empty() {
            return Ok(result);
        }
        let widest = conditions.iter().map(Vec::len).max().unwrap_or(1);
        let chunk_size = self.effective_batch_size(widest);

        let mut done = 0;
        for chunk in conditions.chunks(chunk_size) {
            let mut tx = TransactionGuard::begin(conn).await?;
            for matches in chunk {
                let outcome = match self.builder.delete_query(full_table, matches) {
                    Ok(query) => self.execute_row(&mut tx, &query.sql, &query.params).await,
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(affected) => result.processed += affected,
                    Err(e) if self.aborts_chunk(&e) => {
                        tx.rollback().await?;
                        return Err(chunk_error("delete", result.batches, e));
                    }
                    Err(e) => {
                        warn!(target: "batch", table = full_table, error = %e, "Failed to delete records, continuing");
                        result.failed += 1;
                    }
                }
            }
            tx.commit().await?;
            result.batches += 1;
            done += chunk.len();
            self.log_chunk("delete", full_table, done, conditions.len());
        }

        if self.config.log_progress {
            info!(target: "batch", table = full_table, deleted = result.processed, "Batch delete completed");
        }
        Ok(result)
    }

    /// Page through `full_table` and hand each page to `writer`.
    ///
    /// Stops on an empty page or a page shorter than the batch size. `columns`
    /// are select-list expressions; empty selects `*`.
    pub async fn export_in_batches<W>(
        &self,
        conn: &mut dyn NativeConnection,
        full_table: &str,
        columns: &[String],
        order_by: Option<String>,
        mut writer: W,
    ) -> Result<BatchResult>
    where
        W: FnMut(&QueryResult) -> Result<()> + Send,
    {
        let mut result = BatchResult::default();
        let page_size = self.config.batch_size.max(1);
        let mut offset = 0u64;
        loop {
            let page = self.fetch_page(conn, full_table, columns, order_by.clone(), page_size, offset).await?;
            if page.is_empty() {
                break;
            }
            writer(&page).map_err(|e| {
                EngineError::query(format!("failed to write batch at offset {}: {}", offset, e))
            })?;
            result.processed += page.len() as u64;
            result.batches += 1;
            offset += page_size as u64;
            if self.config.log_progress {
                info!(target: "batch", table = full_table, exported = result.processed, "Export progress");
            }
            if page.len() < page_size {
                break;
            }
        }
        debug!(target: "batch", table = full_table, exported = result.processed, "Export completed");
        Ok(result)
    }

    /// Page through `full_table` and run `processor` on each page.
    ///
    /// A failing page aborts with `fail_on_error`; otherwise it is logged and
    /// counted as failed.
    pub async fn process_in_batches<P>(
        &self,
        conn: &mut dyn NativeConnection,
        full_table: &str,
        order_by: Option<String>,
        mut processor: P,
    ) -> Result<BatchResult>
    where
        P: FnMut(QueryResult) -> Result<()> + Send,
    {
        let mut result = BatchResult::default();
        let page_size = self.config.batch_size.max(1);
        let mut offset = 0u64;
        loop {
            let page = self.fetch_page(conn, full_table, &[], order_by.clone(), page_size, offset).await?;
            let rows = page.len();
            if rows == 0 {
                break;
            }
            match processor(page) {
                Ok(()) => result.processed += rows as u64,
                Err(e) if self.config.fail_on_error => {
                    return Err(EngineError::query(format!(
                        "failed to process batch at offset {}: {}",
                        offset, e
                    )));
                }
                Err(e) => {
                    warn!(target: "batch", table = full_table, offset, error = %e, "Failed to process batch, continuing");
                    result.failed += rows as u64;
                }
            }
            result.batches += 1;
            offset += page_size as u64;
            if self.config.log_progress {
                info!(target: "batch", table = full_table, processed = result.processed, "Process progress");
            }
            if rows < page_size {
                break;
            }
        }
        Ok(result)
    }

    async fn fetch_page(
        &self,
        conn: &mut dyn NativeConnection,
        full_table: &str,
        columns: &[String],
        order_by: Option<String>,
        page_size: usize,
        offset: u64,
    ) -> Result<QueryResult> {
        let options = SelectOptions {
            projection: columns.to_vec(),
            default_order: order_by,
            limit: Some(page_size as u64),
            offset: Some(offset),
            ..Default::default()
        };
        let query = self.builder.select_query(full_table, &options, &HashMap::new())?;
        conn.query(&query.sql, &query.params).await.map_err(|e| {
            warn!(target: "batch", table = full_table, offset, error = %e, "Failed to fetch batch");
            e
        })
    }
}

fn chunk_error(operation: &str, batch: u64, err: EngineError) -> EngineError {
    error!(target: "batch", operation, batch, error = %err, "Chunk rolled back");
    err
}
