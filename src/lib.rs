//! # meterflat - XML metering point ingestion
//!
//! Loads metering point records from XML, strips a namespace prefix from
//! every field name, flattens each record into scalar-only rows and appends
//! the rows to a table.
//!
//! ## Modules
//!
//! - **source**: find input files and parse one raw record per row element
//! - **flatten**: name sanitizer and the flattening engines
//! - **schema**: record schemas, batch schema inference, flat columns
//! - **table**: destination tables (JSON Lines directories, in-memory)
//! - **pipeline**: one batch run with per-record rejection and a report
//! - **config**: TOML ingestion settings
//!
//! ## Quick Start
//!
//! ```rust
//! use meterflat::flatten::{Flattener, NameSanitizer, PassFlattener, RawRecord};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let data = json!({
//!     "ns5:EANID": "871687140000000001",
//!     "ns5:Register": [{"ns5:ID": "1.8.1"}, {"ns5:ID": "1.8.2"}]
//! });
//! let record = RawRecord::new(0, serde_json::from_value(data)?);
//!
//! let clean = NameSanitizer::new("ns5:").sanitize(record)?;
//! let rows = PassFlattener::default().flatten(clean.data)?;
//!
//! // rows[0] = {"EANID": "871687140000000001", "Register_ID": "1.8.1"}
//! assert_eq!(rows.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod flatten;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod table;

// Re-export commonly used types for convenience
pub use config::IngestConfig;
pub use error::{ErrorKind, IngestError, RecordError};
pub use flatten::{FlatRow, FlattenPlan, Flattener, NameSanitizer, PassFlattener, RawRecord, RecordBatch, RowBatch, SingleWalkFlattener};
pub use pipeline::{BatchReport, Pipeline};
pub use schema::{infer_schema, Schema, SchemaBuilder};
pub use source::{RecordSource, XmlSource};
pub use table::{JsonLinesStore, TableStore, WriteMode};

/// Main entry point: ingest XML files into a JSON Lines table
pub fn ingest(config: IngestConfig) -> Result<BatchReport, IngestError> {
    let source = XmlSource::new(config.top_hierarchy_element.clone(), config.xml.clone());
    Pipeline::new(config, source, JsonLinesStore::new()).run()
}
