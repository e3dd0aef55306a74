//! meterflat-ingest: Flatten XML metering points into a table
//!
//! Usage:
//!   # Settings from a file
//!   meterflat-ingest --config ingest.toml
//!
//!   # Everything on the command line
//!   meterflat-ingest --source '/mnt/raw/p4/*.xml' --destination ./bronze/p4
//!
//!   # Dry run: flatten and report, write nothing
//!   meterflat-ingest --config ingest.toml --no-write --json
//!
//! Logging goes to stderr and follows RUST_LOG (default: info).

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use meterflat::flatten::EngineKind;
use meterflat::{IngestConfig, WriteMode};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meterflat-ingest")]
#[command(about = "Flatten XML metering points into a table", long_about = None)]
struct Args {
    /// TOML settings file; flags below override its values
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// File, directory or wildcard pattern to load
    #[arg(long)]
    source: Option<String>,

    /// Destination table directory
    #[arg(long)]
    destination: Option<String>,

    /// Element that makes one record (default: ns5:P4MeteringPoint)
    #[arg(long)]
    row_tag: Option<String>,

    /// Token removed from every field name (default: "ns5:")
    #[arg(long)]
    strip_prefix: Option<String>,

    /// append or overwrite
    #[arg(long)]
    mode: Option<WriteMode>,

    /// Flatten and report without writing
    #[arg(long)]
    no_write: bool,

    /// Skip reading the table back after writing
    #[arg(long)]
    no_verify: bool,

    /// passes or single-walk
    #[arg(long)]
    engine: Option<EngineKind>,

    /// Worker threads for flattening
    #[arg(long)]
    threads: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => IngestConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => IngestConfig::default(),
    };
    apply_overrides(&mut config, &args);

    let report = meterflat::ingest(config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }

    Ok(())
}

/// Flags replace file settings
fn apply_overrides(config: &mut IngestConfig, args: &Args) {
    if let Some(source) = &args.source {
        config.source_uri = source.clone();
    }
    if let Some(destination) = &args.destination {
        config.destination_uri = destination.clone();
    }
    if let Some(row_tag) = &args.row_tag {
        config.top_hierarchy_element = row_tag.clone();
    }
    if let Some(prefix) = &args.strip_prefix {
        config.name_prefix_to_strip = prefix.clone();
    }
    if let Some(mode) = args.mode {
        config.write_mode = mode;
    }
    if args.no_write {
        config.write_enabled = false;
    }
    if args.no_verify {
        config.verify_after_write = false;
    }
    if let Some(engine) = args.engine {
        config.engine = engine;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
}
