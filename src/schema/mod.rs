//! Record schemas
//!
//! A record's schema is derived from its values: objects become `Object`
//! fields, arrays become `List` fields and everything else is a scalar.
//! [`SchemaBuilder`] unions the schemas of a whole batch.

pub mod builder;

pub use builder::{infer_schema, SchemaBuilder};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Field that holds an element's text when the element also has attributes
pub const DEFAULT_VALUE_TAG: &str = "_VALUE";

/// Type of a scalar leaf value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Null,
    Boolean,
    Long,
    Double,
    Date,
    Timestamp,
    String,
}

impl ScalarType {
    /// Scalar type of a value, `None` for objects and arrays
    pub fn of(value: &Value) -> Option<ScalarType> {
        match value {
            Value::Null => Some(ScalarType::Null),
            Value::Bool(_) => Some(ScalarType::Boolean),
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Some(ScalarType::Long)
                } else {
                    Some(ScalarType::Double)
                }
            }
            Value::String(s) => Some(builder::detect_string_type(s)),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Smallest type able to hold values of both types
    pub fn widen(self, other: ScalarType) -> ScalarType {
        use ScalarType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Null, t) | (t, Null) => t,
            (Long, Double) | (Double, Long) => Double,
            (Date, Timestamp) | (Timestamp, Date) => Timestamp,
            _ => String,
        }
    }

    /// Whether a column of this type can store values of `other` without changing type
    pub fn accepts(self, other: ScalarType) -> bool {
        self.widen(other) == self
    }

    /// Convert a cell to this type: integers in `Double` columns become
    /// floats, numbers and booleans in `String` columns become text
    pub fn cast(self, value: Value) -> Value {
        match (self, value) {
            (ScalarType::Double, Value::Number(n)) if !n.is_f64() => {
                match n.as_f64().and_then(Number::from_f64) {
                    Some(float) => Value::Number(float),
                    None => Value::Number(n),
                }
            }
            (ScalarType::String, Value::Number(n)) => Value::String(n.to_string()),
            (ScalarType::String, Value::Bool(b)) => Value::String(b.to_string()),
            (_, value) => value,
        }
    }
}

/// Type of a record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "lowercase")]
pub enum FieldType {
    Scalar(ScalarType),
    Object(Schema),
    List(Box<FieldType>),
}

impl FieldType {
    pub fn is_structural(&self) -> bool {
        !matches!(self, FieldType::Scalar(_))
    }

    /// Number of list and object fields at every depth below and including this one
    pub fn structural_count(&self) -> usize {
        match self {
            FieldType::Scalar(_) => 0,
            FieldType::Object(schema) => 1 + schema.structural_field_count(),
            FieldType::List(element) => 1 + element.structural_count(),
        }
    }

    /// Union of two field types.
    ///
    /// A single value next to a list of the same kind becomes a list. A
    /// scalar next to an object becomes that object with the scalar stored
    /// under `value_tag`, the shape of an element that carries attributes in
    /// some records and only text in others.
    pub fn merge(self, other: FieldType, value_tag: &str) -> FieldType {
        match (self, other) {
            (FieldType::Scalar(a), FieldType::Scalar(b)) => FieldType::Scalar(a.widen(b)),
            (FieldType::Scalar(ScalarType::Null), t) | (t, FieldType::Scalar(ScalarType::Null)) => t,
            (FieldType::Object(a), FieldType::Object(b)) => FieldType::Object(a.merge(b, value_tag)),
            (FieldType::List(a), FieldType::List(b)) => {
                FieldType::List(Box::new(a.merge(*b, value_tag)))
            }
            (FieldType::List(a), single) | (single, FieldType::List(a)) => {
                FieldType::List(Box::new(a.merge(single, value_tag)))
            }
            (FieldType::Object(schema), FieldType::Scalar(scalar))
            | (FieldType::Scalar(scalar), FieldType::Object(schema)) => {
                let text = Schema::new(vec![Field::new(value_tag, FieldType::Scalar(scalar))]);
                FieldType::Object(schema.merge(text, value_tag))
            }
        }
    }

    fn conform(&self, value: Value, value_tag: &str) -> Value {
        match (self, value) {
            (FieldType::Object(schema), Value::Object(map)) => {
                Value::Object(schema.conform(map, value_tag))
            }
            (FieldType::Object(schema), Value::Null) => {
                Value::Object(schema.conform(Map::new(), value_tag))
            }
            (FieldType::Object(schema), text) => {
                let mut wrapped = Map::new();
                wrapped.insert(value_tag.to_string(), text);
                Value::Object(schema.conform(wrapped, value_tag))
            }
            (FieldType::List(element), Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .map(|item| element.conform(item, value_tag))
                    .collect(),
            ),
            // A missing list holds one element of nulls so the row keeps its columns
            (FieldType::List(element), single) => {
                Value::Array(vec![element.conform(single, value_tag)])
            }
            (FieldType::Scalar(_), nested @ (Value::Object(_) | Value::Array(_))) => {
                Value::String(nested.to_string())
            }
            (FieldType::Scalar(_), scalar) => scalar,
        }
    }
}

/// A named field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            field_type,
        }
    }
}

/// Ordered sequence of uniquely named fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Schema { fields }
    }

    /// Schema of a record, in field declaration order
    pub fn of_record(data: &Map<String, Value>) -> Schema {
        builder::observe_map(data, DEFAULT_VALUE_TAG)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of list and object fields across all depths
    pub fn structural_field_count(&self) -> usize {
        self.fields.iter().map(|f| f.field_type.structural_count()).sum()
    }

    /// Field-wise union; new fields are appended in first-seen order
    pub fn merge(mut self, other: Schema, value_tag: &str) -> Schema {
        for field in other.fields {
            match self.fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => {
                    let current = std::mem::replace(
                        &mut existing.field_type,
                        FieldType::Scalar(ScalarType::Null),
                    );
                    existing.field_type = current.merge(field.field_type, value_tag);
                }
                None => self.fields.push(field),
            }
        }
        self
    }

    /// Reshape a record to this schema.
    ///
    /// Fields come out in schema order. Missing fields become `null`,
    /// missing objects become objects of nulls, single values of list-typed
    /// fields are wrapped in one-element lists and a missing list becomes a
    /// list holding one element of nulls. Scalars in object-typed fields are
    /// stored under `value_tag`; objects and lists in scalar-typed fields are
    /// serialized to strings. Fields the schema does not know are passed
    /// through unchanged (appended last).
    pub fn conform(&self, mut data: Map<String, Value>, value_tag: &str) -> Map<String, Value> {
        let mut out = Map::new();
        for field in &self.fields {
            let value = data.shift_remove(&field.name).unwrap_or(Value::Null);
            out.insert(field.name.clone(), field.field_type.conform(value, value_tag));
        }
        for (name, value) in data {
            out.insert(name, value);
        }
        out
    }
}

/// A column of the flat output table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ScalarType,
}

impl FlatColumn {
    pub fn new(name: impl Into<String>, data_type: ScalarType) -> Self {
        FlatColumn {
            name: name.into(),
            data_type,
        }
    }
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}
