//! Field name sanitizer
//!
//! Removes a configured token (typically a namespace prefix such as `ns5:`)
//! from every field name at every depth of a record.

use super::RawRecord;
use crate::error::RecordError;
use crate::schema::{join_path, Field, FieldType, Schema};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct NameSanitizer {
    prefix: String,
}

impl NameSanitizer {
    pub fn new(prefix: impl Into<String>) -> Self {
        NameSanitizer {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Remove every occurrence of the prefix from a name.
    ///
    /// Removal repeats until the prefix no longer occurs, so a name where one
    /// removal re-forms the token (`nns5:s5:x`) is cleaned completely.
    pub fn clean_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            return name.to_string();
        }
        let mut cleaned = name.replace(&self.prefix, "");
        while cleaned.contains(&self.prefix) {
            cleaned = cleaned.replace(&self.prefix, "");
        }
        cleaned
    }

    /// Sanitize a record's field names; values are untouched
    pub fn sanitize(&self, record: RawRecord) -> Result<RawRecord, RecordError> {
        let data = self.sanitize_map(record.data, "")?;
        Ok(RawRecord::new(record.ordinal, data))
    }

    fn sanitize_map(
        &self,
        map: Map<String, Value>,
        path: &str,
    ) -> Result<Map<String, Value>, RecordError> {
        let mut out = Map::new();
        for (name, value) in map {
            let field_path = join_path(path, &name);
            // Nested names first, then the field's own name
            let value = self.sanitize_value(value, &field_path)?;
            let cleaned = self.clean_name(&name);
            if out.contains_key(&cleaned) {
                return Err(RecordError::cast(
                    field_path,
                    format!("renaming `{}` collides with existing field `{}`", name, cleaned),
                ));
            }
            out.insert(cleaned, value);
        }
        Ok(out)
    }

    fn sanitize_value(&self, value: Value, path: &str) -> Result<Value, RecordError> {
        match value {
            Value::Object(map) => Ok(Value::Object(self.sanitize_map(map, path)?)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.sanitize_value(item, path))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            scalar => Ok(scalar),
        }
    }

    /// Sanitize the names of a schema without touching any data
    pub fn sanitize_schema(&self, schema: &Schema) -> Result<Schema, RecordError> {
        self.sanitize_schema_at(schema, "")
    }

    fn sanitize_schema_at(&self, schema: &Schema, path: &str) -> Result<Schema, RecordError> {
        let mut fields: Vec<Field> = Vec::with_capacity(schema.len());
        for field in &schema.fields {
            let field_path = join_path(path, &field.name);
            let field_type = self.sanitize_type(&field.field_type, &field_path)?;
            let cleaned = self.clean_name(&field.name);
            if fields.iter().any(|f| f.name == cleaned) {
                return Err(RecordError::cast(
                    field_path,
                    format!(
                        "renaming `{}` collides with existing field `{}`",
                        field.name, cleaned
                    ),
                ));
            }
            fields.push(Field::new(cleaned, field_type));
        }
        Ok(Schema::new(fields))
    }

    fn sanitize_type(&self, field_type: &FieldType, path: &str) -> Result<FieldType, RecordError> {
        match field_type {
            FieldType::Object(inner) => Ok(FieldType::Object(self.sanitize_schema_at(inner, path)?)),
            FieldType::List(element) => {
                Ok(FieldType::List(Box::new(self.sanitize_type(element, path)?)))
            }
            scalar => Ok(scalar.clone()),
        }
    }
}
