//! XML record reader
//!
//! Every element whose qualified name equals the row tag becomes one raw
//! record. Inside a record:
//!
//! - child elements become fields, keeping their qualified names (`ns5:EANID`)
//! - a child name repeated under one parent becomes a list, in document order
//! - attributes become `{attribute_prefix}{name}` fields
//! - text next to attributes or children is stored under `value_tag`
//! - leaf text is trimmed; blank text is `null`

use super::{discover_files, RecordSource};
use crate::error::SourceError;
use crate::flatten::RecordBatch;
use crate::schema::{SchemaBuilder, DEFAULT_VALUE_TAG};
use once_cell::sync::Lazy;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::path::Path;
use tracing::{debug, info};

static INTEGER_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?(0|[1-9]\d*)$").unwrap());

static DECIMAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(0|[1-9]\d*)(\.\d+([eE][+-]?\d+)?|[eE][+-]?\d+)$").unwrap()
});

/// How XML content maps onto record fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XmlOptions {
    /// Prefix for fields built from attributes
    pub attribute_prefix: String,

    /// Field holding an element's text when it also has attributes or children
    pub value_tag: String,

    /// Parse numbers and booleans out of text content
    pub infer_types: bool,

    /// Conform all records of a batch to their union schema
    pub unify_schema: bool,

    /// Deepest element nesting accepted inside one record
    pub max_depth: usize,
}

impl Default for XmlOptions {
    fn default() -> Self {
        XmlOptions {
            attribute_prefix: String::from("_"),
            value_tag: String::from(DEFAULT_VALUE_TAG),
            infer_types: true,
            unify_schema: true,
            max_depth: 128,
        }
    }
}

/// Type a piece of text: integers without leading zeros that fit in an
/// `i64`, decimals, booleans, otherwise the text itself
pub fn infer_scalar(text: &str) -> Value {
    if INTEGER_REGEX.is_match(text) {
        if let Ok(n) = text.parse::<i64>() {
            return Value::from(n);
        }
        return Value::String(text.to_string());
    }

    if DECIMAL_REGEX.is_match(text) {
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }

    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    Value::String(text.to_string())
}

/// An element being assembled
struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

/// Loads raw records from XML files
#[derive(Debug, Clone)]
pub struct XmlSource {
    row_tag: String,
    options: XmlOptions,
}

impl XmlSource {
    pub fn new(row_tag: impl Into<String>, options: XmlOptions) -> Self {
        XmlSource {
            row_tag: row_tag.into(),
            options,
        }
    }

    pub fn row_tag(&self) -> &str {
        &self.row_tag
    }

    /// Parse one document held in memory
    pub fn parse_str(&self, xml: &str) -> Result<Vec<Map<String, Value>>, SourceError> {
        self.parse_document(xml, Path::new("<inline>"))
    }

    fn parse_document(
        &self,
        xml: &str,
        path: &Path,
    ) -> Result<Vec<Map<String, Value>>, SourceError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Frame> = Vec::new();
        let mut records = Vec::new();

        let fail = |position: u64, message: String| SourceError::Xml {
            path: path.to_path_buf(),
            position,
            message,
        };

        loop {
            let event = reader
                .read_event()
                .map_err(|e| fail(reader.error_position() as u64, e.to_string()))?;
            let position = reader.buffer_position() as u64;

            match event {
                Event::Start(element) => {
                    let name = element_name(&element).map_err(|m| fail(position, m))?;
                    if !stack.is_empty() || name == self.row_tag {
                        self.check_depth(stack.len(), &name).map_err(|m| fail(position, m))?;
                        let fields = self.attributes(&element).map_err(|m| fail(position, m))?;
                        stack.push(Frame {
                            name,
                            fields,
                            text: String::new(),
                        });
                    }
                }
                Event::Empty(element) => {
                    let name = element_name(&element).map_err(|m| fail(position, m))?;
                    if !stack.is_empty() || name == self.row_tag {
                        self.check_depth(stack.len(), &name).map_err(|m| fail(position, m))?;
                        let fields = self.attributes(&element).map_err(|m| fail(position, m))?;
                        let frame = Frame {
                            name,
                            fields,
                            text: String::new(),
                        };
                        self.close(frame, &mut stack, &mut records);
                    }
                }
                Event::End(_) => {
                    if let Some(frame) = stack.pop() {
                        self.close(frame, &mut stack, &mut records);
                    }
                }
                Event::Text(text) => {
                    if let Some(frame) = stack.last_mut() {
                        let decoded = text.decode().map_err(|e| fail(position, e.to_string()))?;
                        frame.text.push_str(&decoded);
                    }
                }
                Event::CData(data) => {
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::GeneralRef(reference) => {
                    if let Some(frame) = stack.last_mut() {
                        let resolved = resolve_reference(&reference).map_err(|m| fail(position, m))?;
                        frame.text.push_str(&resolved);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(fail(
                reader.buffer_position() as u64,
                format!("unclosed element `{}`", open.name),
            ));
        }

        Ok(records)
    }

    /// Element nesting is capped so the recursive passes over a record stay shallow
    fn check_depth(&self, open: usize, name: &str) -> Result<(), String> {
        if open >= self.options.max_depth {
            return Err(format!(
                "element `{}` is nested deeper than {} levels",
                name, self.options.max_depth
            ));
        }
        Ok(())
    }

    fn attributes(&self, element: &BytesStart<'_>) -> Result<Map<String, Value>, String> {
        let mut fields = Map::new();
        for attribute in element.attributes() {
            let attribute = attribute.map_err(|e| e.to_string())?;
            let key = std::str::from_utf8(attribute.key.as_ref()).map_err(|e| e.to_string())?;
            // Namespace declarations are not data
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let value = attribute.unescape_value().map_err(|e| e.to_string())?;
            fields.insert(
                format!("{}{}", self.options.attribute_prefix, key),
                self.scalar(value.trim()),
            );
        }
        Ok(fields)
    }

    fn scalar(&self, text: &str) -> Value {
        if self.options.infer_types {
            infer_scalar(text)
        } else {
            Value::String(text.to_string())
        }
    }

    fn finish(&self, mut fields: Map<String, Value>, text: &str) -> Value {
        let text = text.trim();
        if fields.is_empty() {
            if text.is_empty() {
                Value::Null
            } else {
                self.scalar(text)
            }
        } else {
            if !text.is_empty() {
                fields.insert(self.options.value_tag.clone(), self.scalar(text));
            }
            Value::Object(fields)
        }
    }

    fn close(&self, frame: Frame, stack: &mut [Frame], records: &mut Vec<Map<String, Value>>) {
        let value = self.finish(frame.fields, &frame.text);
        match stack.last_mut() {
            Some(parent) => insert_child(&mut parent.fields, frame.name, value),
            None => records.push(match value {
                Value::Object(fields) => fields,
                Value::Null => Map::new(),
                text => {
                    let mut fields = Map::new();
                    fields.insert(self.options.value_tag.clone(), text);
                    fields
                }
            }),
        }
    }

    fn load_file(&self, path: &Path) -> Result<Vec<Map<String, Value>>, SourceError> {
        let xml = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let records = self.parse_document(&xml, path)?;
        debug!(file = %path.display(), records = records.len(), "parsed XML file");
        Ok(records)
    }
}

impl RecordSource for XmlSource {
    fn load_records(&self, source_uri: &str) -> Result<RecordBatch, SourceError> {
        let files = discover_files(source_uri)?;

        let mut records = Vec::new();
        for path in &files {
            records.extend(self.load_file(path)?);
        }

        if self.options.unify_schema && !records.is_empty() {
            let mut builder = SchemaBuilder::with_value_tag(self.options.value_tag.as_str());
            for data in &records {
                builder.add_record(data);
            }
            let schema = builder.build();
            let value_tag = &self.options.value_tag;
            records = records
                .into_iter()
                .map(|data| schema.conform(data, value_tag))
                .collect();
        }

        info!(
            files = files.len(),
            records = records.len(),
            row_tag = %self.row_tag,
            "loaded raw records"
        );
        Ok(RecordBatch::from_maps(records))
    }
}

fn element_name(element: &BytesStart<'_>) -> Result<String, String> {
    std::str::from_utf8(element.name().as_ref())
        .map(str::to_string)
        .map_err(|e| e.to_string())
}

fn resolve_reference(reference: &BytesRef<'_>) -> Result<String, String> {
    if let Some(ch) = reference.resolve_char_ref().map_err(|e| e.to_string())? {
        return Ok(ch.to_string());
    }
    let name = reference.decode().map_err(|e| e.to_string())?;
    resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| format!("unknown entity `&{};`", name))
}

/// Add a child value; a repeated name turns the field into a list
fn insert_child(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const METERING_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ns5:P4Response xmlns:ns5="urn:nl:edsn:p4">
  <ns5:P4MeteringPoint>
    <ns5:EANID>871687140000000001</ns5:EANID>
    <ns5:Meter>
      <ns5:ID>E0001</ns5:ID>
      <ns5:Register>
        <ns5:ID>1.8.1</ns5:ID>
        <ns5:Reading unit="KWH">1500.5</ns5:Reading>
      </ns5:Register>
      <ns5:Register>
        <ns5:ID>1.8.2</ns5:ID>
        <ns5:Reading unit="KWH">200</ns5:Reading>
      </ns5:Register>
    </ns5:Meter>
  </ns5:P4MeteringPoint>
  <ns5:P4MeteringPoint>
    <ns5:EANID>871687140000000002</ns5:EANID>
    <ns5:Meter>
      <ns5:ID>G0002</ns5:ID>
      <ns5:Register>
        <ns5:ID>1.8.0</ns5:ID>
        <ns5:Reading unit="M3">12</ns5:Reading>
      </ns5:Register>
    </ns5:Meter>
  </ns5:P4MeteringPoint>
</ns5:P4Response>"#;

    fn source() -> XmlSource {
        XmlSource::new("ns5:P4MeteringPoint", XmlOptions::default())
    }

    #[test]
    fn test_one_record_per_row_tag() {
        let records = source().parse_str(METERING_DOC).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["ns5:EANID"], json!(871687140000000001i64));
    }

    #[test]
    fn test_repeated_children_become_lists() {
        let records = source().parse_str(METERING_DOC).unwrap();
        assert_eq!(
            records[0]["ns5:Meter"]["ns5:Register"],
            json!([
                {"ns5:ID": "1.8.1", "ns5:Reading": {"_unit": "KWH", "_VALUE": 1500.5}},
                {"ns5:ID": "1.8.2", "ns5:Reading": {"_unit": "KWH", "_VALUE": 200}}
            ])
        );
        // A single occurrence stays a single value until the batch is unified
        assert!(records[1]["ns5:Meter"]["ns5:Register"].is_object());
    }

    #[test]
    fn test_text_decoding() {
        let xml = r#"<root><row><name>A &amp; B &#65;</name><raw><![CDATA[<x>]]></raw><empty/><blank>  </blank></row></root>"#;
        let records = XmlSource::new("row", XmlOptions::default()).parse_str(xml).unwrap();
        assert_eq!(
            Value::Object(records[0].clone()),
            json!({"name": "A & B A", "raw": "<x>", "empty": null, "blank": null})
        );
    }

    #[test]
    fn test_scalar_inference() {
        assert_eq!(infer_scalar("42"), json!(42));
        assert_eq!(infer_scalar("-1.25"), json!(-1.25));
        assert_eq!(infer_scalar("1e3"), json!(1000.0));
        assert_eq!(infer_scalar("TRUE"), json!(true));
        assert_eq!(infer_scalar("0042"), json!("0042"));
        assert_eq!(infer_scalar("1.8.1"), json!("1.8.1"));
        assert_eq!(infer_scalar("99999999999999999999"), json!("99999999999999999999"));
    }

    #[test]
    fn test_types_kept_as_text_when_inference_disabled() {
        let options = XmlOptions {
            infer_types: false,
            ..XmlOptions::default()
        };
        let records = XmlSource::new("row", options)
            .parse_str("<rows><row><n>7</n></row></rows>")
            .unwrap();
        assert_eq!(records[0]["n"], json!("7"));
    }

    #[test]
    fn test_row_tag_attributes_and_text() {
        let records = XmlSource::new("row", XmlOptions::default())
            .parse_str(r#"<rows xmlns="urn:x"><row id="3">hello</row><row id="4"/></rows>"#)
            .unwrap();
        assert_eq!(Value::Object(records[0].clone()), json!({"_id": 3, "_VALUE": "hello"}));
        assert_eq!(Value::Object(records[1].clone()), json!({"_id": 4}));
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        let err = source()
            .parse_str("<ns5:P4MeteringPoint><a></b></ns5:P4MeteringPoint>")
            .unwrap_err();
        assert!(matches!(err, SourceError::Xml { .. }));
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let options = XmlOptions {
            max_depth: 3,
            ..XmlOptions::default()
        };
        let source = XmlSource::new("row", options);

        assert!(source.parse_str("<rows><row><a><b>1</b></a></row></rows>").is_ok());

        let err = source
            .parse_str("<rows><row><a><b><c>1</c></b></a></row></rows>")
            .unwrap_err();
        assert!(matches!(err, SourceError::Xml { ref message, .. } if message.contains("`c`")));

        let err = source
            .parse_str("<rows><row><a><b><c/></b></a></row></rows>")
            .unwrap_err();
        assert!(matches!(err, SourceError::Xml { .. }));
    }

    #[test]
    fn test_default_depth_rejects_pathological_documents() {
        let depth = 10_000;
        let xml = format!(
            "<rows><row>{}1{}</row></rows>",
            "<n>".repeat(depth),
            "</n>".repeat(depth)
        );
        let err = XmlSource::new("row", XmlOptions::default())
            .parse_str(&xml)
            .unwrap_err();
        assert!(matches!(err, SourceError::Xml { .. }));
    }

    #[test]
    fn test_unclosed_record_is_an_error() {
        let err = XmlSource::new("row", XmlOptions::default())
            .parse_str("<rows><row><a>1</a>")
            .unwrap_err();
        assert!(matches!(err, SourceError::Xml { .. }));
    }
}
