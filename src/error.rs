//! Error types for meterflat.
//!
//! - [`RecordError`] - record-scoped failures; the record is rejected, the batch continues
//! - [`SourceError`] - failures of the record loader
//! - [`WriteError`] - failures of the table store
//! - [`ConfigError`] - invalid or unreadable configuration
//! - [`IngestError`] - batch-level error returned by the pipeline

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classification used in batch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ErrorKind {
    SchemaCast,
    MalformedSchema,
    ExternalIo,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SchemaCast => "SchemaCastError",
            ErrorKind::MalformedSchema => "MalformedSchemaError",
            ErrorKind::ExternalIo => "ExternalIOError",
        };
        f.write_str(name)
    }
}

/// Errors that reject a single record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A nested field could not be re-typed after its names were rewritten
    #[error("schema cast failed at `{path}`: {reason}")]
    SchemaCast { path: String, reason: String },

    /// A field's type could not be interpreted as scalar, list or object
    #[error("malformed schema at `{path}`: {reason}")]
    MalformedSchema { path: String, reason: String },
}

impl RecordError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecordError::SchemaCast { .. } => ErrorKind::SchemaCast,
            RecordError::MalformedSchema { .. } => ErrorKind::MalformedSchema,
        }
    }

    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordError::MalformedSchema {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn cast(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RecordError::SchemaCast {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from loading raw records.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed XML in {path} at byte {position}: {message}")]
    Xml {
        path: PathBuf,
        position: u64,
        message: String,
    },

    #[error("invalid source pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("no input files match `{uri}`")]
    NoInput { uri: String },
}

/// Errors from writing or reading the destination table.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("table I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode table data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt table file {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("column `{column}` does not match the table schema: {reason}")]
    SchemaMismatch { column: String, reason: String },

    #[error("no table at `{uri}`")]
    NotFound { uri: String },
}

/// Errors in the ingestion configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("`{0}` must be set")]
    Missing(&'static str),

    #[error("invalid value for `{key}`: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Batch-level failure of an ingestion run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("loading records failed: {0}")]
    Source(#[from] SourceError),

    #[error("writing rows failed: {0}")]
    Write(#[from] WriteError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl IngestError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            IngestError::Source(_) | IngestError::Write(_) => Some(ErrorKind::ExternalIo),
            IngestError::Config(_) | IngestError::ThreadPool(_) => None,
        }
    }
}
