//! Record flattening - turn nested records into flat table rows
//!
//! A raw record first goes through the [`NameSanitizer`], then through a
//! [`Flattener`] that removes every object and list field. Object fields are
//! unnested into `{parent}_{child}` columns; list fields are exploded into
//! one row per element.
//!
//! Two engines produce the same rows:
//!
//! - [`PassFlattener`] rewrites the leftmost structural field per pass until
//!   only scalars remain
//! - [`SingleWalkFlattener`] builds the row cross product in one bottom-up walk

pub mod engine;
pub mod plan;
pub mod planned;
pub mod sanitize;

pub use engine::PassFlattener;
pub use plan::FlattenPlan;
pub use planned::SingleWalkFlattener;
pub use sanitize::NameSanitizer;

use crate::error::{ConfigError, RecordError};
use crate::schema::{FlatColumn, ScalarType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;

/// A fully scalar, table-ready row
pub type FlatRow = Map<String, Value>;

/// One parsed top-level element, before flattening
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Position of the record in its batch
    pub ordinal: usize,
    pub data: Map<String, Value>,
}

impl RawRecord {
    pub fn new(ordinal: usize, data: Map<String, Value>) -> Self {
        RawRecord { ordinal, data }
    }
}

/// Raw records handed from the loader to the pipeline
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<RawRecord>,
}

impl RecordBatch {
    /// Build a batch, numbering records in iteration order
    pub fn from_maps<I>(maps: I) -> Self
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        RecordBatch {
            records: maps
                .into_iter()
                .enumerate()
                .map(|(ordinal, data)| RawRecord::new(ordinal, data))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Flat rows plus the columns they populate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    pub columns: Vec<FlatColumn>,
    pub rows: Vec<FlatRow>,
}

impl RowBatch {
    /// Derive columns from the rows: first-seen order, widened types.
    /// Cells are converted to their column's type.
    pub fn from_rows(rows: Vec<FlatRow>) -> Self {
        let mut columns: Vec<FlatColumn> = Vec::new();
        for row in &rows {
            for (name, value) in row.iter() {
                let data_type = ScalarType::of(value).unwrap_or(ScalarType::String);
                match columns.iter_mut().find(|c| &c.name == name) {
                    Some(column) => column.data_type = column.data_type.widen(data_type),
                    None => columns.push(FlatColumn::new(name.clone(), data_type)),
                }
            }
        }
        let rows = cast_rows(rows, &columns);
        RowBatch { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&FlatColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Convert every cell to the type of its column; cells of unknown columns are kept
pub(crate) fn cast_rows(rows: Vec<FlatRow>, columns: &[FlatColumn]) -> Vec<FlatRow> {
    let types: HashMap<&str, ScalarType> = columns
        .iter()
        .map(|c| (c.name.as_str(), c.data_type))
        .collect();

    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(name, cell)| {
                    let cell = match types.get(name.as_str()) {
                        Some(data_type) => data_type.cast(cell),
                        None => cell,
                    };
                    (name, cell)
                })
                .collect()
        })
        .collect()
}

/// Turns one record into flat rows
pub trait Flattener: Send + Sync {
    fn flatten(&self, data: Map<String, Value>) -> Result<Vec<FlatRow>, RecordError>;
}

/// Which flattening engine to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    #[default]
    Passes,
    SingleWalk,
}

impl EngineKind {
    pub fn build(self, separator: &str) -> Box<dyn Flattener> {
        match self {
            EngineKind::Passes => Box::new(PassFlattener::new(separator)),
            EngineKind::SingleWalk => Box::new(SingleWalkFlattener::new(separator)),
        }
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passes" => Ok(EngineKind::Passes),
            "single-walk" => Ok(EngineKind::SingleWalk),
            other => Err(ConfigError::Invalid {
                key: "engine",
                value: other.to_string(),
            }),
        }
    }
}

/// Reject lists whose non-null elements are not all of one kind
pub(crate) fn check_list_elements(name: &str, items: &[Value]) -> Result<(), RecordError> {
    let mut seen: Option<&'static str> = None;
    for item in items {
        let kind = match item {
            Value::Null => continue,
            Value::Object(_) => "object",
            Value::Array(_) => "list",
            _ => "scalar",
        };
        match seen {
            None => seen = Some(kind),
            Some(previous) if previous != kind => {
                return Err(RecordError::malformed(
                    name,
                    format!("list elements mix {} and {} values", previous, kind),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub(crate) fn is_structural(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}
