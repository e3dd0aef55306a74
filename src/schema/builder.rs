//! Batch schema builder
//!
//! Accumulates the union of record schemas across a batch. The loader uses
//! the result to conform heterogeneous records to one shape before they are
//! flattened, so every record of a batch yields the same columns.

use super::{Field, FieldType, ScalarType, Schema, DEFAULT_VALUE_TAG};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?$").unwrap()
});

static ISO_DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap()
});

/// Classify a string as a date, a timestamp or plain text
pub(crate) fn detect_string_type(value: &str) -> ScalarType {
    let len = value.len();

    // Fixed-position dashes before touching the regexes
    if len < 10 || value.as_bytes()[4] != b'-' || value.as_bytes()[7] != b'-' {
        return ScalarType::String;
    }

    if len == 10 && ISO_DATE_REGEX.is_match(value) {
        return ScalarType::Date;
    }

    if len >= 16 && value.as_bytes()[10] == b'T' && ISO_DATETIME_REGEX.is_match(value) {
        return ScalarType::Timestamp;
    }

    ScalarType::String
}

/// Type of a value; list elements are merged, so observing never fails
fn observe(value: &Value, value_tag: &str) -> FieldType {
    match value {
        Value::Object(map) => FieldType::Object(observe_map(map, value_tag)),
        Value::Array(items) => {
            let element = items
                .iter()
                .map(|item| observe(item, value_tag))
                .fold(FieldType::Scalar(ScalarType::Null), |acc, t| acc.merge(t, value_tag));
            FieldType::List(Box::new(element))
        }
        scalar => FieldType::Scalar(ScalarType::of(scalar).unwrap_or(ScalarType::String)),
    }
}

pub(crate) fn observe_map(map: &Map<String, Value>, value_tag: &str) -> Schema {
    Schema::new(
        map.iter()
            .map(|(name, value)| Field::new(name.clone(), observe(value, value_tag)))
            .collect(),
    )
}

/// Accumulates the union schema of many records
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
    value_tag: String,
    sample_count: usize,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        SchemaBuilder::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        SchemaBuilder::with_value_tag(DEFAULT_VALUE_TAG)
    }

    /// Builder whose text-and-attribute merges store text under `value_tag`
    pub fn with_value_tag(value_tag: impl Into<String>) -> Self {
        SchemaBuilder {
            schema: Schema::default(),
            value_tag: value_tag.into(),
            sample_count: 0,
        }
    }

    pub fn value_tag(&self) -> &str {
        &self.value_tag
    }

    /// Fold one record into the union
    pub fn add_record(&mut self, data: &Map<String, Value>) {
        self.sample_count += 1;
        let observed = observe_map(data, &self.value_tag);
        let current = std::mem::take(&mut self.schema);
        self.schema = current.merge(observed, &self.value_tag);
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

/// Union schema of a set of records
pub fn infer_schema<'a, I>(records: I) -> Schema
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    let mut builder = SchemaBuilder::new();
    for data in records {
        builder.add_record(data);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_empty_builder() {
        let builder = SchemaBuilder::new();
        assert_eq!(builder.sample_count(), 0);
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_detect_string_types() {
        assert_eq!(detect_string_type("2024-01-31"), ScalarType::Date);
        assert_eq!(detect_string_type("2024-01-31T23:00:00Z"), ScalarType::Timestamp);
        assert_eq!(detect_string_type("2024-01-31T23:00:00.000+01:00"), ScalarType::Timestamp);
        assert_eq!(detect_string_type("871687140000000001"), ScalarType::String);
        assert_eq!(detect_string_type("2024-1-31"), ScalarType::String);
        assert_eq!(detect_string_type("kWh"), ScalarType::String);
    }

    #[test]
    fn test_union_keeps_first_seen_order() {
        let records = vec![
            record(json!({"b": 1, "a": "x"})),
            record(json!({"c": true, "b": 2})),
        ];

        let schema = infer_schema(&records);
        let names: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_union_of_nested_objects() {
        let records = vec![
            record(json!({"meter": {"ean": "1"}})),
            record(json!({"meter": {"grid": "north"}})),
        ];

        let schema = infer_schema(&records);
        let FieldType::Object(meter) = &schema.field("meter").unwrap().field_type else {
            panic!("meter should stay an object");
        };
        assert!(meter.field("ean").is_some());
        assert!(meter.field("grid").is_some());
    }

    #[test]
    fn test_repeated_element_becomes_list() {
        let records = vec![
            record(json!({"register": {"id": 1}})),
            record(json!({"register": [{"id": 2}, {"id": 3}]})),
        ];

        let schema = infer_schema(&records);
        let FieldType::List(element) = &schema.field("register").unwrap().field_type else {
            panic!("register should become a list");
        };
        assert!(matches!(element.as_ref(), FieldType::Object(_)));

        let conformed = schema.conform(records[0].clone(), DEFAULT_VALUE_TAG);
        assert_eq!(Value::Object(conformed), json!({"register": [{"id": 1}]}));
    }

    #[test]
    fn test_text_and_attribute_element_becomes_object() {
        let records = vec![
            record(json!({"status": "ok"})),
            record(json!({"status": {"code": 3}})),
        ];

        let schema = infer_schema(&records);
        let FieldType::Object(status) = &schema.field("status").unwrap().field_type else {
            panic!("status should become an object");
        };
        assert_eq!(
            status.field("_VALUE").unwrap().field_type,
            FieldType::Scalar(ScalarType::String)
        );
        assert!(status.field("code").is_some());
    }

    #[test]
    fn test_custom_value_tag() {
        let mut builder = SchemaBuilder::with_value_tag("#text");
        builder.add_record(&record(json!({"reading": {"_unit": "M3"}})));
        builder.add_record(&record(json!({"reading": 12})));

        let schema = builder.build();
        let FieldType::Object(reading) = &schema.field("reading").unwrap().field_type else {
            panic!("reading should become an object");
        };
        assert!(reading.field("#text").is_some());
    }

    #[test]
    fn test_mixed_list_elements_merge_to_objects() {
        let records = vec![record(json!({"reading": [{"_unit": "KWH", "_VALUE": 5}, 7]}))];

        let schema = infer_schema(&records);
        let conformed = schema.conform(records[0].clone(), DEFAULT_VALUE_TAG);
        assert_eq!(
            Value::Object(conformed),
            json!({"reading": [{"_unit": "KWH", "_VALUE": 5}, {"_unit": null, "_VALUE": 7}]})
        );
    }
}
