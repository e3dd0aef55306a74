//! Flat column plans
//!
//! Runs the pass algorithm over a schema instead of over data. The result is
//! the flat tabular schema a batch conforming to that schema produces: column
//! names, their scalar types and the column order [`PassFlattener`] emits.
//!
//! [`PassFlattener`]: super::PassFlattener

use crate::error::RecordError;
use crate::schema::{FieldType, FlatColumn, ScalarType, Schema};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenPlan {
    /// Output columns in emission order
    pub columns: Vec<FlatColumn>,

    /// Passes needed to reach the flat schema
    pub passes: usize,
}

impl FlattenPlan {
    /// Derive the flat schema of `schema`
    pub fn from_schema(schema: &Schema, separator: &str) -> Result<Self, RecordError> {
        let mut fields: Vec<(String, FieldType)> = schema
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.field_type.clone()))
            .collect();
        let mut passes = 0;

        while let Some(position) = fields.iter().position(|(_, t)| t.is_structural()) {
            let (name, field_type) = fields.remove(position);
            passes += 1;

            match field_type {
                FieldType::List(element) => fields.push((name, *element)),
                FieldType::Object(inner) => {
                    for field in inner.fields {
                        let column = format!("{}{}{}", name, separator, field.name);
                        if fields.iter().any(|(existing, _)| *existing == column) {
                            return Err(RecordError::malformed(
                                column.clone(),
                                format!("unnesting `{}` collides with existing column `{}`", name, column),
                            ));
                        }
                        fields.push((column, field.field_type));
                    }
                }
                scalar => fields.push((name, scalar)),
            }
        }

        let columns = fields
            .into_iter()
            .map(|(name, field_type)| {
                let data_type = match field_type {
                    FieldType::Scalar(scalar) => scalar,
                    _ => ScalarType::String,
                };
                FlatColumn::new(name, data_type)
            })
            .collect();

        Ok(FlattenPlan { columns, passes })
    }

    /// Plan for the union schema of a set of records
    pub fn from_records<'a, I>(records: I, separator: &str) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = &'a Map<String, Value>>,
    {
        let schema = crate::schema::infer_schema(records);
        Self::from_schema(&schema, separator)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
