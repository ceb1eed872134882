//! Row and storage-unit writes for [`SqlPlugin`]

use super::batch::BatchProcessor;
use super::config::{BatchConfig, PluginConfig};
use super::connection::NativeConnection;
use super::engine::SqlPlugin;
use super::error::{EngineError, Result};
use super::model::{ColumnDef, Record, EXTRA_NULLABLE, EXTRA_PRIMARY};
use super::value::{Value, ValueRow};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Row count above which bulk inserts log per-chunk progress
const PROGRESS_THRESHOLD: usize = 10_000;

/// A single-row write split into assignments and row matches
#[derive(Debug, Default)]
struct RowTarget {
    set: Vec<(String, Value)>,
    matches: Vec<(String, Value)>,
}

impl SqlPlugin {
    pub(crate) async fn create_storage_unit(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        fields: &[Record],
    ) -> Result<bool> {
        if fields.is_empty() {
            return Err(EngineError::validation("no fields provided for table creation"));
        }
        let columns = fields
            .iter()
            .map(|field| {
                if !self.dialect().is_supported_column_type(&field.value) {
                    return Err(EngineError::validation(format!(
                        "data type: {} not supported by: {}",
                        field.value,
                        self.dialect().database_type()
                    )));
                }
                Ok(ColumnDef {
                    name: field.key.clone(),
                    type_name: field.value.clone(),
                    primary: field.extra_flag(EXTRA_PRIMARY),
                    nullable: field.extra_flag(EXTRA_NULLABLE),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let sql = self.builder().create_table_query(schema, unit, &columns)?;
        debug!(target: "engine", schema, table = unit, sql = %sql, "Creating storage unit");

        self.run(
            config,
            "add_storage_unit",
            &[("schema", schema.to_string()), ("table", unit.to_string())],
            move |mut conn| async move { conn.execute(&sql, &[]).await },
        )
        .await?;
        Ok(true)
    }

    pub(crate) async fn insert_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        values: &[Record],
    ) -> Result<bool> {
        if values.is_empty() {
            return Err(EngineError::validation("no values provided to insert into the table"));
        }
        let full_table = self.dialect().build_full_table_name(schema, unit)?;
        let (columns, row): (Vec<String>, ValueRow) =
            self.converter().convert_record_values(values)?.into_iter().unzip();
        let query = self.builder().insert_query(&full_table, &columns, &[row])?;

        self.run(
            config,
            "add_row",
            &[("schema", schema.to_string()), ("table", unit.to_string())],
            move |mut conn| async move { conn.execute(&query.sql, &query.params).await },
        )
        .await?;
        Ok(true)
    }

    /// Update `updated_columns` of the row identified by the remaining values.
    ///
    /// Primary-key columns identify the row when the table has any; otherwise
    /// every unchanged column does. Zero affected rows is `NotFound`.
    pub(crate) async fn modify_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        values: &[Record],
        updated_columns: &[String],
    ) -> Result<bool> {
        let details = [("schema", schema.to_string()), ("table", unit.to_string())];
        let full_table = self.dialect().build_full_table_name(schema, unit)?;
        let intro = self.introspector();

        self.run(config, "update_row", &details, move |mut conn| async move {
            let column_types = intro.get_column_types(&mut conn, schema, unit).await?;
            let primary_keys = intro.get_primary_keys(&mut conn, schema, unit).await;
            let target = self.split_row(values, &column_types, &primary_keys, Some(updated_columns), unit)?;
            if target.set.is_empty() {
                debug!(target: "engine", table = unit, "No columns to update");
                return Ok(true);
            }
            if target.matches.is_empty() {
                return Err(EngineError::validation(
                    "no identifying values provided to match the row for update",
                ));
            }
            let query = self.builder().update_query(&full_table, &target.set, &target.matches)?;
            let affected = conn.execute(&query.sql, &query.params).await?;
            if affected == 0 {
                return Err(EngineError::not_found("no rows were updated"));
            }
            Ok(true)
        })
        .await
    }

    pub(crate) async fn remove_row(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        values: &[Record],
    ) -> Result<bool> {
        let details = [("schema", schema.to_string()), ("table", unit.to_string())];
        let full_table = self.dialect().build_full_table_name(schema, unit)?;
        let intro = self.introspector();

        self.run(config, "delete_row", &details, move |mut conn| async move {
            let column_types = intro.get_column_types(&mut conn, schema, unit).await?;
            let primary_keys = intro.get_primary_keys(&mut conn, schema, unit).await;
            let target = self.split_row(values, &column_types, &primary_keys, None, unit)?;
            let query = self.builder().delete_query(&full_table, &target.matches)?;
            let affected = conn.execute(&query.sql, &query.params).await?;
            if affected == 0 {
                return Err(EngineError::not_found("no rows were deleted"));
            }
            Ok(true)
        })
        .await
    }

    pub(crate) async fn clear_rows(&self, config: &PluginConfig, schema: &str, unit: &str) -> Result<bool> {
        let full_table = self.dialect().build_full_table_name(schema, unit)?;
        let sql = self.dialect().clear_table_query(&full_table);
        let affected = self
            .run(
                config,
                "clear_table_data",
                &[("schema", schema.to_string()), ("table", unit.to_string())],
                move |mut conn| async move { conn.execute(&sql, &[]).await },
            )
            .await?;
        info!(target: "engine", schema, table = unit, affected, "Cleared table data");
        Ok(true)
    }

    /// Insert many rows through the batch processor.
    ///
    /// Columns are the union of every row's keys in first-seen order; a row
    /// lacking a column binds NULL for it.
    pub(crate) async fn insert_rows(
        &self,
        config: &PluginConfig,
        schema: &str,
        unit: &str,
        rows: &[Vec<Record>],
    ) -> Result<bool> {
        let Some(first) = rows.first() else {
            return Ok(true);
        };
        if first.is_empty() {
            return Err(EngineError::validation("no values provided to insert into the table"));
        }
        let full_table = self.dialect().build_full_table_name(schema, unit)?;
        let mut columns: Vec<String> = Vec::with_capacity(first.len());
        for record in rows.iter().flatten() {
            if !columns.contains(&record.key) {
                columns.push(record.key.clone());
            }
        }
        let values = rows
            .iter()
            .map(|row| self.align_row(&columns, row))
            .collect::<Result<Vec<_>>>()?;

        let batch_config = BatchConfig::default().with_log_progress(rows.len() > PROGRESS_THRESHOLD);
        let converter = self.converter();
        let result = self
            .run(
                config,
                "bulk_add_rows",
                &[("schema", schema.to_string()), ("table", unit.to_string())],
                move |mut conn| async move {
                    BatchProcessor::new(converter, batch_config)
                        .insert_batch(&mut conn, &full_table, &columns, &values)
                        .await
                },
            )
            .await?;
        debug!(target: "engine", table = unit, inserted = result.processed, batches = result.batches, "Bulk insert finished");
        Ok(true)
    }

    fn align_row(&self, columns: &[String], row: &[Record]) -> Result<ValueRow> {
        let converted: HashMap<String, Value> =
            self.converter().convert_record_values(row)?.into_iter().collect();
        Ok(columns
            .iter()
            .map(|c| converted.get(c).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Split `values` into SET assignments and row matches.
    ///
    /// `updated` is `None` for deletes, where every value is a match candidate.
    fn split_row(
        &self,
        values: &[Record],
        column_types: &HashMap<String, String>,
        primary_keys: &[String],
        updated: Option<&[String]>,
        unit: &str,
    ) -> Result<RowTarget> {
        let mut target = RowTarget::default();
        for record in values {
            let Some(column_type) = column_types.get(&record.key) else {
                return Err(EngineError::validation(format!(
                    "column '{}' does not exist in table {}",
                    record.key, unit
                )));
            };

            if updated.is_some_and(|cols| cols.iter().any(|c| c == &record.key)) {
                let value = if record.is_null() {
                    Value::Null
                } else {
                    self.converter()
                        .convert_from_string(&record.value, column_type)
                        .map_err(|e| {
                            EngineError::validation(format!(
                                "failed to convert value for column '{}': {}",
                                record.key, e
                            ))
                        })?
                };
                target.set.push((record.key.clone(), value));
                continue;
            }

            let identifies = if primary_keys.is_empty() {
                true
            } else {
                primary_keys.iter().any(|pk| pk == &record.key)
            };
            if identifies {
                target
                    .matches
                    .push((record.key.clone(), self.match_value(record, column_type)));
            }
        }
        Ok(target)
    }

    fn match_value(&self, record: &Record, column_type: &str) -> Value {
        if record.is_null() {
            return Value::Null;
        }
        match self.converter().convert_from_string(&record.value, column_type) {
            Ok(value) => value,
            Err(e) => {
                // lossy-fallback: keep matching on the raw text
                warn!(
                    target: "engine",
                    column = %record.key,
                    column_type,
                    error = %e,
                    "Match value did not convert, comparing as text"
                );
                Value::Text(record.value.clone())
            }
        }
    }
}
