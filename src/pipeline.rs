//! Batch ingestion: load, sanitize, flatten, write, verify
//!
//! Loader and writer failures abort the run. Everything that goes wrong with
//! a single record only rejects that record; rejections are logged and
//! counted in the [`BatchReport`].

use crate::config::IngestConfig;
use crate::error::{ErrorKind, IngestError, RecordError};
use crate::flatten::{FlatRow, Flattener, NameSanitizer, RecordBatch, RowBatch};
use crate::source::RecordSource;
use crate::table::TableStore;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// A record excluded from the output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub ordinal: usize,
    pub kind: ErrorKind,
    pub message: String,
}

impl Rejection {
    fn new(ordinal: usize, error: &RecordError) -> Self {
        Rejection {
            ordinal,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Result of flattening a whole batch
#[derive(Debug, Clone, Default)]
pub struct FlattenOutcome {
    pub rows: Vec<FlatRow>,
    pub rejected: Vec<Rejection>,
    /// Records that flattened cleanly but produced no rows (an empty list somewhere)
    pub records_without_rows: usize,
}

/// Sanitize and flatten every record of a batch on the current rayon pool.
///
/// Rows keep record order; rows of one record keep the order the engine
/// produced them in.
pub fn flatten_batch(
    batch: RecordBatch,
    sanitizer: &NameSanitizer,
    flattener: &dyn Flattener,
) -> FlattenOutcome {
    let results: Vec<(usize, Result<Vec<FlatRow>, RecordError>)> = batch
        .records
        .into_par_iter()
        .map(|record| {
            let ordinal = record.ordinal;
            let rows = sanitizer
                .sanitize(record)
                .and_then(|clean| flattener.flatten(clean.data));
            (ordinal, rows)
        })
        .collect();

    let mut outcome = FlattenOutcome::default();
    for (ordinal, result) in results {
        match result {
            Ok(rows) if rows.is_empty() => {
                warn!(record = ordinal, "record produced no rows (empty list)");
                outcome.records_without_rows += 1;
            }
            Ok(rows) => outcome.rows.extend(rows),
            Err(error) => {
                warn!(record = ordinal, kind = %error.kind(), "rejected record: {}", error);
                outcome.rejected.push(Rejection::new(ordinal, &error));
            }
        }
    }
    outcome
}

/// What a batch run did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub records_in: usize,
    pub rows_out: usize,
    pub records_without_rows: usize,
    pub rejected: Vec<Rejection>,
    /// `None` when writing is disabled
    pub rows_written: Option<usize>,
    /// Row count read back from the table, `None` when not verified
    pub table_rows: Option<usize>,
}

impl BatchReport {
    pub fn rejected_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for rejection in &self.rejected {
            *counts.entry(rejection.kind).or_insert(0) += 1;
        }
        counts
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "records in:           {}", self.records_in)?;
        writeln!(f, "rows out:             {}", self.rows_out)?;
        writeln!(f, "records without rows: {}", self.records_without_rows)?;
        writeln!(f, "rejected records:     {}", self.rejected.len())?;
        for (kind, count) in self.rejected_by_kind() {
            writeln!(f, "  {}: {}", kind, count)?;
        }
        match self.rows_written {
            Some(n) => writeln!(f, "rows written:         {}", n)?,
            None => writeln!(f, "rows written:         (write disabled)")?,
        }
        if let Some(n) = self.table_rows {
            writeln!(f, "table rows:           {}", n)?;
        }
        Ok(())
    }
}

/// One ingestion run over a source and a destination table
pub struct Pipeline<S, T> {
    config: IngestConfig,
    source: S,
    store: T,
}

impl<S: RecordSource, T: TableStore> Pipeline<S, T> {
    pub fn new(config: IngestConfig, source: S, store: T) -> Self {
        Pipeline {
            config,
            source,
            store,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn store(&self) -> &T {
        &self.store
    }

    pub fn run(&self) -> Result<BatchReport, IngestError> {
        self.config.validate()?;
        let config = &self.config;

        info!(source = %config.source_uri, row_tag = %config.top_hierarchy_element, "loading records");
        let batch = self.source.load_records(&config.source_uri)?;
        let records_in = batch.len();

        let sanitizer = NameSanitizer::new(config.name_prefix_to_strip.as_str());
        let flattener = config.engine.build(&config.separator);
        let outcome = match config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()?;
                pool.install(|| flatten_batch(batch, &sanitizer, flattener.as_ref()))
            }
            None => flatten_batch(batch, &sanitizer, flattener.as_ref()),
        };

        let rows = RowBatch::from_rows(outcome.rows);
        debug!(columns = rows.columns.len(), rows = rows.len(), "flattened batch");

        let mut report = BatchReport {
            records_in,
            rows_out: rows.len(),
            records_without_rows: outcome.records_without_rows,
            rejected: outcome.rejected,
            rows_written: None,
            table_rows: None,
        };

        if !config.write_enabled {
            info!("writing disabled, skipping table write");
            return Ok(report);
        }

        let written = self
            .store
            .write_rows(&rows, &config.destination_uri, config.write_mode)?;
        report.rows_written = Some(written);

        if config.verify_after_write {
            let table = self.store.read_rows(&config.destination_uri)?;
            info!(destination = %config.destination_uri, rows = table.len(), "verified table");
            report.table_rows = Some(table.len());
        }

        info!(
            records_in = report.records_in,
            rows_out = report.rows_out,
            rejected = report.rejected.len(),
            "batch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::flatten::EngineKind;
    use crate::table::{MemoryStore, WriteMode};
    use serde_json::{json, Value};

    struct StaticSource(Vec<Value>);

    impl RecordSource for StaticSource {
        fn load_records(&self, _source_uri: &str) -> Result<RecordBatch, SourceError> {
            Ok(RecordBatch::from_maps(
                self.0
                    .iter()
                    .map(|v| serde_json::from_value(v.clone()).unwrap()),
            ))
        }
    }

    struct MissingSource;

    impl RecordSource for MissingSource {
        fn load_records(&self, source_uri: &str) -> Result<RecordBatch, SourceError> {
            Err(SourceError::NoInput {
                uri: source_uri.to_string(),
            })
        }
    }

    fn config() -> IngestConfig {
        IngestConfig {
            source_uri: "memory://raw".to_string(),
            destination_uri: "memory://bronze".to_string(),
            ..IngestConfig::default()
        }
    }

    fn metering_points() -> Vec<Value> {
        vec![
            json!({
                "ns5:EANID": "871",
                "ns5:Meter": {"ns5:ID": "E1", "ns5:Register": [{"ns5:ID": "1.8.1"}, {"ns5:ID": "1.8.2"}]}
            }),
            json!({"ns5:EANID": "872", "ns5:Meter": {"ns5:ID": "G2", "ns5:Register": []}}),
            json!({"ns5:EANID": "873", "EANID": "dup"}),
            json!({"ns5:EANID": "874", "ns5:Tags": [1, {"x": 2}]}),
        ]
    }

    #[test]
    fn test_run_reports_and_writes() {
        let pipeline = Pipeline::new(config(), StaticSource(metering_points()), MemoryStore::new());
        let report = pipeline.run().unwrap();

        assert_eq!(report.records_in, 4);
        assert_eq!(report.rows_out, 2);
        assert_eq!(report.records_without_rows, 1);
        assert_eq!(report.rows_written, Some(2));
        assert_eq!(report.table_rows, Some(2));

        let kinds = report.rejected_by_kind();
        assert_eq!(kinds.get(&ErrorKind::SchemaCast), Some(&1));
        assert_eq!(kinds.get(&ErrorKind::MalformedSchema), Some(&1));
        assert_eq!(report.rejected[0].ordinal, 2);
        assert_eq!(report.rejected[1].ordinal, 3);

        let table = pipeline.store().read_rows("memory://bronze").unwrap();
        assert_eq!(
            Value::Object(table.rows[0].clone()),
            json!({"EANID": "871", "Meter_ID": "E1", "Meter_Register_ID": "1.8.1"})
        );
    }

    #[test]
    fn test_naming_example() {
        let pipeline = Pipeline::new(
            config(),
            StaticSource(vec![json!({"ns5:A": {"ns5:B": 1}})]),
            MemoryStore::new(),
        );
        pipeline.run().unwrap();

        let table = pipeline.store().read_rows("memory://bronze").unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(Value::Object(table.rows[0].clone()), json!({"A_B": 1}));
    }

    #[test]
    fn test_write_disabled() {
        let config = IngestConfig {
            write_enabled: false,
            destination_uri: String::new(),
            ..config()
        };
        let pipeline = Pipeline::new(config, StaticSource(metering_points()), MemoryStore::new());
        let report = pipeline.run().unwrap();

        assert_eq!(report.rows_written, None);
        assert_eq!(report.table_rows, None);
        assert!(pipeline.store().read_rows("memory://bronze").is_err());
    }

    #[test]
    fn test_loader_failure_aborts() {
        let pipeline = Pipeline::new(config(), MissingSource, MemoryStore::new());
        let err = pipeline.run().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ExternalIo));
    }

    #[test]
    fn test_invalid_config_aborts() {
        let config = IngestConfig {
            source_uri: String::new(),
            ..config()
        };
        let err = Pipeline::new(config, StaticSource(vec![]), MemoryStore::new())
            .run()
            .unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn test_dedicated_pool_and_engines_agree() {
        let records = vec![
            json!({"tag": "x", "items": [1, 2, 3]}),
            json!({"a": [1, 2], "b": [10, 20]}),
        ];

        let mut counts = Vec::new();
        for engine in [EngineKind::Passes, EngineKind::SingleWalk] {
            let config = IngestConfig {
                engine,
                threads: Some(2),
                ..config()
            };
            let report = Pipeline::new(config, StaticSource(records.clone()), MemoryStore::new())
                .run()
                .unwrap();
            counts.push(report.rows_out);
        }
        assert_eq!(counts, vec![7, 7]);
    }

    #[test]
    fn test_append_accumulates() {
        let store = MemoryStore::new();
        let records = vec![json!({"ns5:EANID": "871"})];
        store
            .write_rows(
                &RowBatch::from_rows(vec![serde_json::from_value(json!({"EANID": "870"})).unwrap()]),
                "memory://bronze",
                WriteMode::Append,
            )
            .unwrap();

        let pipeline = Pipeline::new(config(), StaticSource(records), store);
        let report = pipeline.run().unwrap();
        assert_eq!(report.rows_written, Some(1));
        assert_eq!(report.table_rows, Some(2));
    }

    #[test]
    fn test_report_display() {
        let report = BatchReport {
            records_in: 3,
            rows_out: 5,
            records_without_rows: 0,
            rejected: vec![Rejection::new(1, &RecordError::malformed("x", "bad"))],
            rows_written: Some(5),
            table_rows: Some(5),
        };
        let text = report.to_string();
        assert!(text.contains("records in:           3"));
        assert!(text.contains("MalformedSchemaError: 1"));
        assert!(text.contains("table rows:           5"));
    }
}
