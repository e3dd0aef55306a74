//! Single-walk flattening
//!
//! Computes, for every field, the rows its subtree contributes, then joins
//! them bottom-up:
//!
//! - a scalar contributes one single-column row
//! - an object contributes the cross product of its fields' rows, with
//!   `{field}{separator}` prefixed column names
//! - a list contributes the concatenation of its elements' rows (an empty
//!   list contributes none)
//!
//! The record's rows are the cross product of its top-level fields. The row
//! set equals the one [`PassFlattener`] produces without rescanning the record
//! after every rewrite; columns come out in field order instead.
//!
//! [`PassFlattener`]: super::PassFlattener

use super::{check_list_elements, FlatRow, Flattener};
use crate::error::RecordError;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct SingleWalkFlattener {
    separator: String,
}

impl Default for SingleWalkFlattener {
    fn default() -> Self {
        SingleWalkFlattener::new("_")
    }
}

impl SingleWalkFlattener {
    pub fn new(separator: impl Into<String>) -> Self {
        SingleWalkFlattener {
            separator: separator.into(),
        }
    }

    fn walk(&self, value: Value, name: String) -> Result<Vec<FlatRow>, RecordError> {
        match value {
            Value::Object(inner) => {
                let fields = inner
                    .into_iter()
                    .map(|(child, v)| (format!("{}{}{}", name, self.separator, child), v));
                self.cross_join(fields)
            }
            Value::Array(items) => {
                check_list_elements(&name, &items)?;
                let mut rows = Vec::new();
                for item in items {
                    rows.extend(self.walk(item, name.clone())?);
                }
                Ok(rows)
            }
            scalar => {
                let mut row = Map::new();
                row.insert(name, scalar);
                Ok(vec![row])
            }
        }
    }

    fn cross_join<I>(&self, fields: I) -> Result<Vec<FlatRow>, RecordError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut joined = vec![Map::new()];

        for (name, value) in fields {
            let part = self.walk(value, name)?;
            if part.is_empty() {
                return Ok(Vec::new());
            }

            let mut next = Vec::with_capacity(joined.len() * part.len());
            for left in &joined {
                for right in &part {
                    let mut row = left.clone();
                    for (column, cell) in right {
                        if row.contains_key(column) {
                            return Err(RecordError::malformed(
                                column.clone(),
                                format!("column `{}` produced twice", column),
                            ));
                        }
                        row.insert(column.clone(), cell.clone());
                    }
                    next.push(row);
                }
            }
            joined = next;
        }

        Ok(joined)
    }
}

impl Flattener for SingleWalkFlattener {
    fn flatten(&self, data: Map<String, Value>) -> Result<Vec<FlatRow>, RecordError> {
        self.cross_join(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::PassFlattener;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn same_rows(a: &[FlatRow], b: &[FlatRow]) -> bool {
        let count = |rows: &[FlatRow], row: &FlatRow| rows.iter().filter(|r| *r == row).count();
        a.len() == b.len() && a.iter().all(|row| count(a, row) == count(b, row))
    }

    #[test]
    fn test_same_rows_as_pass_engine() {
        let fixtures = vec![
            json!({"tag": "x", "items": [1, 2, 3]}),
            json!({"a": [1, 2], "b": [10, 20]}),
            json!({"tag": "x", "items": []}),
            json!({"ean": "871", "flag": false}),
            json!({
                "point": {
                    "ean": "871",
                    "registers": [
                        {"id": 1, "reads": [{"v": 1.0}, {"v": 2.0}]},
                        {"id": 2, "reads": [{"v": 3.0}]}
                    ]
                },
                "labels": ["p", "q"],
                "meta": {"source": "dso"}
            }),
            json!({"m": [[1, 2], [], [3]]}),
        ];

        let passes = PassFlattener::default();
        let walk = SingleWalkFlattener::default();
        for fixture in fixtures {
            let expected = passes.flatten(record(fixture.clone())).unwrap();
            let actual = walk.flatten(record(fixture.clone())).unwrap();
            assert!(same_rows(&expected, &actual), "row sets differ for {fixture}");
        }
    }

    #[test]
    fn test_columns_in_field_order() {
        let rows = SingleWalkFlattener::default()
            .flatten(record(json!({"meter": {"ean": "1"}, "status": "on"})))
            .unwrap();
        let keys: Vec<&str> = rows[0].keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["meter_ean", "status"]);
    }

    #[test]
    fn test_cross_product_count() {
        let rows = SingleWalkFlattener::default()
            .flatten(record(json!({"a": [1, 2, 3], "b": {"c": ["x", "y"]}})))
            .unwrap();
        assert_eq!(rows.len(), 6);
    }

    #[test]
    fn test_collision_is_malformed() {
        let err = SingleWalkFlattener::default()
            .flatten(record(json!({"a_b": 1, "a": [{"b": 2}]})))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedSchema);
    }
}
