//! Pass-based flattening engine
//!
//! Each pass scans a record's top-level fields in declaration order and
//! rewrites the first structural one:
//!
//! - a list field is exploded into one copy of the record per element, the
//!   element taking the field's name
//! - an object field is unnested, each inner field becoming a
//!   `{field}{separator}{inner}` column
//!
//! The rewritten field moves to the end of the record. Passes repeat on every
//! produced copy until no list or object field is left. Every pass removes one
//! structural field occurrence from the copies it produces, so the loop ends
//! after at most as many passes per copy as the record has structural fields
//! across all depths.
//!
//! A list with no elements produces no copies: the record contributes no rows.

use super::{check_list_elements, is_structural, FlatRow, Flattener};
use crate::error::RecordError;
use serde_json::{Map, Value};

/// Outcome of one pass over one record copy
enum Pass {
    Terminal(FlatRow),
    Rewritten(Vec<Map<String, Value>>),
}

#[derive(Debug, Clone)]
pub struct PassFlattener {
    separator: String,
}

impl Default for PassFlattener {
    fn default() -> Self {
        PassFlattener::new("_")
    }
}

impl PassFlattener {
    pub fn new(separator: impl Into<String>) -> Self {
        PassFlattener {
            separator: separator.into(),
        }
    }

    /// Flatten and also report how many passes were executed in total
    pub fn flatten_counted(
        &self,
        data: Map<String, Value>,
    ) -> Result<(Vec<FlatRow>, usize), RecordError> {
        // Depth-first over copies, in element order
        let mut pending = vec![data];
        let mut rows = Vec::new();
        let mut passes = 0;

        while let Some(current) = pending.pop() {
            match self.pass(current)? {
                Pass::Terminal(row) => rows.push(row),
                Pass::Rewritten(copies) => {
                    passes += 1;
                    pending.extend(copies.into_iter().rev());
                }
            }
        }

        Ok((rows, passes))
    }

    fn pass(&self, data: Map<String, Value>) -> Result<Pass, RecordError> {
        let mut rest = Map::new();
        let mut target: Option<(String, Value)> = None;

        for (name, value) in data {
            if target.is_none() && is_structural(&value) {
                target = Some((name, value));
            } else {
                rest.insert(name, value);
            }
        }

        match target {
            None => Ok(Pass::Terminal(rest)),
            Some((name, Value::Array(items))) => Ok(Pass::Rewritten(self.explode(rest, name, items)?)),
            Some((name, Value::Object(inner))) => {
                Ok(Pass::Rewritten(vec![self.unnest(rest, &name, inner)?]))
            }
            Some((name, other)) => Err(RecordError::malformed(
                name,
                format!("cannot rewrite non-structural value {}", other),
            )),
        }
    }

    fn explode(
        &self,
        rest: Map<String, Value>,
        name: String,
        items: Vec<Value>,
    ) -> Result<Vec<Map<String, Value>>, RecordError> {
        check_list_elements(&name, &items)?;

        if items.is_empty() {
            tracing::trace!(field = %name, "empty list, record copy dropped");
        }

        Ok(items
            .into_iter()
            .map(|element| {
                let mut copy = rest.clone();
                copy.insert(name.clone(), element);
                copy
            })
            .collect())
    }

    fn unnest(
        &self,
        mut rest: Map<String, Value>,
        name: &str,
        inner: Map<String, Value>,
    ) -> Result<Map<String, Value>, RecordError> {
        for (child, value) in inner {
            let column = format!("{}{}{}", name, self.separator, child);
            if rest.contains_key(&column) {
                return Err(RecordError::malformed(
                    column.clone(),
                    format!("unnesting `{}` collides with existing column `{}`", name, column),
                ));
            }
            rest.insert(column, value);
        }
        Ok(rest)
    }
}

impl Flattener for PassFlattener {
    fn flatten(&self, data: Map<String, Value>) -> Result<Vec<FlatRow>, RecordError> {
        self.flatten_counted(data).map(|(rows, _)| rows)
    }
}
