//! Destination tables for flat rows
//!
//! A [`TableStore`] appends a [`RowBatch`] to the table behind a destination
//! URI, or replaces its content, and can read the table back for
//! verification. Appends never change a table's columns: a batch with an
//! unknown column or an incompatible type is refused.

pub mod jsonl;

pub use jsonl::JsonLinesStore;

use crate::error::{ConfigError, WriteError};
use crate::flatten::{cast_rows, RowBatch};
use crate::schema::{FlatColumn, ScalarType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Append,
    Overwrite,
}

impl FromStr for WriteMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            other => Err(ConfigError::Invalid {
                key: "write_mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Writes flat rows to, and reads them from, destination tables
pub trait TableStore {
    /// Write `rows` to the table at `destination_uri`, returning the number of rows written
    fn write_rows(
        &self,
        rows: &RowBatch,
        destination_uri: &str,
        mode: WriteMode,
    ) -> Result<usize, WriteError>;

    /// Read the whole table at `destination_uri`
    fn read_rows(&self, destination_uri: &str) -> Result<RowBatch, WriteError>;
}

/// Columns of a table after appending a batch with `incoming` columns.
///
/// A column that only ever held nulls takes the incoming type.
pub(crate) fn append_columns(
    table: &[FlatColumn],
    incoming: &[FlatColumn],
) -> Result<Vec<FlatColumn>, WriteError> {
    if table.is_empty() {
        return Ok(incoming.to_vec());
    }

    let mut columns = table.to_vec();
    for column in incoming {
        let Some(existing) = columns.iter_mut().find(|c| c.name == column.name) else {
            return Err(WriteError::SchemaMismatch {
                column: column.name.clone(),
                reason: "column is not part of the table".to_string(),
            });
        };

        if existing.data_type == ScalarType::Null {
            existing.data_type = column.data_type;
        } else if !existing.data_type.accepts(column.data_type) {
            return Err(WriteError::SchemaMismatch {
                column: column.name.clone(),
                reason: format!(
                    "table type {:?} cannot hold {:?} values",
                    existing.data_type, column.data_type
                ),
            });
        }
    }
    Ok(columns)
}

/// Tables kept in memory, keyed by destination URI
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, RowBatch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl TableStore for MemoryStore {
    fn write_rows(
        &self,
        rows: &RowBatch,
        destination_uri: &str,
        mode: WriteMode,
    ) -> Result<usize, WriteError> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());

        if mode == WriteMode::Append {
            if let Some(table) = tables.get_mut(destination_uri) {
                table.columns = append_columns(&table.columns, &rows.columns)?;
                table.rows.extend(cast_rows(rows.rows.clone(), &table.columns));
                return Ok(rows.len());
            }
        }

        tables.insert(destination_uri.to_string(), rows.clone());
        Ok(rows.len())
    }

    fn read_rows(&self, destination_uri: &str) -> Result<RowBatch, WriteError> {
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .get(destination_uri)
            .cloned()
            .ok_or_else(|| WriteError::NotFound {
                uri: destination_uri.to_string(),
            })
    }
}
