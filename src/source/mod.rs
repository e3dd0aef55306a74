//! Raw record sources
//!
//! A source turns a `source_uri` into a [`RecordBatch`]. The URI names a
//! file, a directory (every data file in it) or a directory plus a file
//! name pattern with `*` and `?` wildcards.

pub mod xml;

pub use xml::{XmlOptions, XmlSource};

use crate::error::SourceError;
use crate::flatten::RecordBatch;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Loads the raw records behind a URI
pub trait RecordSource {
    fn load_records(&self, source_uri: &str) -> Result<RecordBatch, SourceError>;
}

/// Resolve a source URI to the files it names, sorted by path.
///
/// Files whose names start with `.` or `_` are bookkeeping files and are
/// skipped when listing a directory.
pub fn discover_files(source_uri: &str) -> Result<Vec<PathBuf>, SourceError> {
    let path = Path::new(source_uri);
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    let mut files = if file_name.contains('*') || file_name.contains('?') {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let pattern = wildcard_regex(file_name)?;
        list_data_files(dir)?
            .into_iter()
            .filter(|f| {
                f.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| pattern.is_match(n))
                    .unwrap_or(false)
            })
            .collect()
    } else if path.is_dir() {
        list_data_files(path)?
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        Vec::new()
    };

    if files.is_empty() {
        return Err(SourceError::NoInput {
            uri: source_uri.to_string(),
        });
    }

    files.sort();
    Ok(files)
}

fn list_data_files(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let io_error = |source| SourceError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let hidden = entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with('.') || n.starts_with('_'))
            .unwrap_or(true);
        if hidden {
            continue;
        }
        if entry.file_type().map_err(io_error)?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn wildcard_regex(pattern: &str) -> Result<Regex, SourceError> {
    let mut expr = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|source| SourceError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}
