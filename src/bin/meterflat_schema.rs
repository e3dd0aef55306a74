//! meterflat-schema: Show the schema and flat columns of XML input
//!
//! Loads the records behind a source URI, infers their union schema, strips
//! the name prefix and prints the columns flattening would produce.
//!
//! Usage:
//!   meterflat-schema p4_response.xml
//!   meterflat-schema '/mnt/raw/p4/*.xml' --row-tag ns5:P4MeteringPoint --compact

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use meterflat::source::{RecordSource, XmlOptions, XmlSource};
use meterflat::{infer_schema, FlattenPlan, NameSanitizer};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meterflat-schema")]
#[command(about = "Show the schema and flat columns of XML input", long_about = None)]
struct Args {
    /// File, directory or wildcard pattern
    #[arg(value_name = "FILE")]
    input: String,

    /// Element that makes one record
    #[arg(long, default_value = "ns5:P4MeteringPoint")]
    row_tag: String,

    /// Token removed from every field name
    #[arg(long, default_value = "ns5:")]
    strip_prefix: String,

    /// Joins parent and child names of unnested objects
    #[arg(long, default_value = "_")]
    separator: String,

    /// Compact output (no pretty-printing)
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let source = XmlSource::new(args.row_tag.as_str(), XmlOptions::default());
    let batch = source.load_records(&args.input)?;

    let schema = infer_schema(batch.records.iter().map(|r| &r.data));
    let schema = NameSanitizer::new(args.strip_prefix.as_str())
        .sanitize_schema(&schema)
        .context("Failed to sanitize field names")?;
    let plan = FlattenPlan::from_schema(&schema, &args.separator)
        .context("Failed to plan flat columns")?;

    let output = json!({
        "records": batch.len(),
        "schema": schema,
        "structural_fields": schema.structural_field_count(),
        "plan": plan,
    });

    if args.compact {
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(())
}
