//! JSON Lines table directories
//!
//! Layout of a table directory:
//!
//! ```text
//! <destination>/
//!   _table.json        version, columns, part list
//!   part-00000.jsonl   one immutable file per write, one row per line
//!   part-00001.jsonl
//! ```
//!
//! `_table.json` is replaced atomically after a part is written, so readers
//! never see a part that is not committed.

use super::{append_columns, TableStore, WriteMode};
use crate::error::WriteError;
use crate::flatten::{cast_rows, FlatRow, RowBatch};
use crate::schema::FlatColumn;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

const METADATA_FILE: &str = "_table.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableMetadata {
    version: u64,
    columns: Vec<FlatColumn>,
    parts: Vec<PartMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PartMetadata {
    file: String,
    rows: usize,
}

/// Tables stored as directories of JSON Lines part files
#[derive(Debug, Clone, Default)]
pub struct JsonLinesStore;

impl JsonLinesStore {
    pub fn new() -> Self {
        JsonLinesStore
    }
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_metadata(dir: &Path) -> Result<Option<TableMetadata>, WriteError> {
    let path = dir.join(METADATA_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path).map_err(io_error(&path))?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| WriteError::Decode {
            path,
            message: e.to_string(),
        })
}

fn write_metadata(dir: &Path, metadata: &TableMetadata) -> Result<(), WriteError> {
    let staging = dir.join(format!(".{}.tmp", METADATA_FILE));
    let bytes = serde_json::to_vec_pretty(metadata)?;
    fs::write(&staging, bytes).map_err(io_error(&staging))?;

    let path = dir.join(METADATA_FILE);
    fs::rename(&staging, &path).map_err(io_error(&path))
}

fn write_part(path: &Path, rows: &[FlatRow]) -> Result<(), WriteError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n").map_err(io_error(path))?;
    }
    writer.flush().map_err(io_error(path))
}

fn read_part(path: &Path) -> Result<Vec<FlatRow>, WriteError> {
    let content = fs::read(path).map_err(io_error(path))?;
    let mut rows = Vec::new();

    for line in content.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        // simd-json parses in place
        let mut buffer = line.to_vec();
        let row: FlatRow =
            simd_json::serde::from_slice(&mut buffer).map_err(|e| WriteError::Decode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        rows.push(row);
    }

    Ok(rows)
}

impl TableStore for JsonLinesStore {
    fn write_rows(
        &self,
        rows: &RowBatch,
        destination_uri: &str,
        mode: WriteMode,
    ) -> Result<usize, WriteError> {
        let dir = Path::new(destination_uri);
        fs::create_dir_all(dir).map_err(io_error(dir))?;

        let (mut metadata, stale_parts) = match (read_metadata(dir)?, mode) {
            (Some(current), WriteMode::Append) => {
                let columns = append_columns(&current.columns, &rows.columns)?;
                let metadata = TableMetadata {
                    version: current.version + 1,
                    columns,
                    parts: current.parts,
                };
                (metadata, Vec::new())
            }
            (Some(current), WriteMode::Overwrite) => {
                let metadata = TableMetadata {
                    version: current.version + 1,
                    columns: rows.columns.clone(),
                    parts: Vec::new(),
                };
                (metadata, current.parts)
            }
            (None, _) => {
                let metadata = TableMetadata {
                    version: 0,
                    columns: rows.columns.clone(),
                    parts: Vec::new(),
                };
                (metadata, Vec::new())
            }
        };

        if !rows.is_empty() {
            let file = format!("part-{:05}.jsonl", metadata.version);
            let path = dir.join(&file);
            write_part(&path, &cast_rows(rows.rows.clone(), &metadata.columns))?;
            debug!(part = %path.display(), rows = rows.len(), "wrote table part");
            metadata.parts.push(PartMetadata {
                file,
                rows: rows.len(),
            });
        }

        write_metadata(dir, &metadata)?;

        for stale in stale_parts {
            let path = dir.join(&stale.file);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path)(e)),
            }
        }

        info!(
            table = %destination_uri,
            version = metadata.version,
            rows = rows.len(),
            ?mode,
            "committed table write"
        );
        Ok(rows.len())
    }

    fn read_rows(&self, destination_uri: &str) -> Result<RowBatch, WriteError> {
        let dir = Path::new(destination_uri);
        let metadata = read_metadata(dir)?.ok_or_else(|| WriteError::NotFound {
            uri: destination_uri.to_string(),
        })?;

        let mut rows = Vec::new();
        for part in &metadata.parts {
            rows.extend(read_part(&dir.join(&part.file))?);
        }

        Ok(RowBatch {
            columns: metadata.columns,
            rows,
        })
    }
}
