//! Ingestion configuration
//!
//! Plain key/value settings read from a TOML file. Every key is optional in
//! the file; command-line flags override file values.
//!
//! ```toml
//! source_uri = "/mnt/raw/p4/*"
//! destination_uri = "/mnt/bronze/p4"
//! top_hierarchy_element = "ns5:P4MeteringPoint"
//! name_prefix_to_strip = "ns5:"
//! write_enabled = true
//! write_mode = "append"
//!
//! [xml]
//! attribute_prefix = "_"
//! value_tag = "_VALUE"
//! max_depth = 128
//! ```

use crate::error::ConfigError;
use crate::flatten::EngineKind;
use crate::source::XmlOptions;
use crate::table::WriteMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// File, directory or wildcard pattern to load
    pub source_uri: String,

    /// Table to write flat rows to
    pub destination_uri: String,

    /// Qualified name of the element that makes one record
    pub top_hierarchy_element: String,

    /// Token removed from every field name
    pub name_prefix_to_strip: String,

    /// Write rows to the destination; when false the run only reports
    pub write_enabled: bool,

    pub write_mode: WriteMode,

    /// Read the table back after writing and report its row count
    pub verify_after_write: bool,

    pub engine: EngineKind,

    /// Joins parent and child names of unnested objects
    pub separator: String,

    /// Worker threads for flattening (rayon's global pool when unset)
    pub threads: Option<usize>,

    pub xml: XmlOptions,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            source_uri: String::new(),
            destination_uri: String::new(),
            top_hierarchy_element: String::from("ns5:P4MeteringPoint"),
            name_prefix_to_strip: String::from("ns5:"),
            write_enabled: true,
            write_mode: WriteMode::Append,
            verify_after_write: true,
            engine: EngineKind::Passes,
            separator: String::from("_"),
            threads: None,
            xml: XmlOptions::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check the settings a run cannot do without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_uri.is_empty() {
            return Err(ConfigError::Missing("source_uri"));
        }
        if self.top_hierarchy_element.is_empty() {
            return Err(ConfigError::Missing("top_hierarchy_element"));
        }
        if self.write_enabled && self.destination_uri.is_empty() {
            return Err(ConfigError::Missing("destination_uri"));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid {
                key: "threads",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.top_hierarchy_element, "ns5:P4MeteringPoint");
        assert_eq!(config.name_prefix_to_strip, "ns5:");
        assert!(config.write_enabled);
        assert_eq!(config.write_mode, WriteMode::Append);
        assert_eq!(config.xml.value_tag, "_VALUE");
    }

    #[test]
    fn test_parse_toml() {
        let config = IngestConfig::from_toml_str(
            r#"
            source_uri = "/data/raw/*"
            destination_uri = "/data/bronze"
            write_mode = "overwrite"
            engine = "single-walk"
            threads = 4

            [xml]
            infer_types = false
            "#,
        )
        .unwrap();

        assert_eq!(config.source_uri, "/data/raw/*");
        assert_eq!(config.write_mode, WriteMode::Overwrite);
        assert_eq!(config.engine, EngineKind::SingleWalk);
        assert_eq!(config.threads, Some(4));
        assert!(!config.xml.infer_types);
        assert_eq!(config.xml.attribute_prefix, "_");
        assert_eq!(config.name_prefix_to_strip, "ns5:");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(IngestConfig::from_toml_str(r#"write_mode = "merge""#).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = IngestConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("source_uri"))));

        config.source_uri = "in.xml".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("destination_uri"))));

        config.write_enabled = false;
        assert!(config.validate().is_ok());
    }
}
