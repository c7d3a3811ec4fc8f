//! ads-flatten: Flatten ads platform response rows into JSON Lines tables
//!
//! Usage:
//!   # Read a JSON array (or a single row) from a file, output to stdout
//!   ads-flatten rows.json
//!
//!   # Read NDJSON from stdin
//!   cat rows.jsonl | ads-flatten --ndjson
//!
//!   # Name enum codes and override how `metrics` is flattened
//!   ads-flatten rows.json --enums enums.json --path-overrides overrides.json -o table.jsonl
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use ads_flatten::flatten::{PathConfig, PathOverride, TableWriter};
use ads_flatten::message::{EnumBindings, EnumDescriptor, Message};
use ads_flatten::report::{response_to_table, ReportOptions};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ads-flatten")]
#[command(about = "Flatten nested ads platform response rows into tables", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Process newline-delimited JSON (one row per line)
    #[arg(long)]
    ndjson: bool,

    /// Output file (stdout if omitted)
    #[arg(long, short = 'o')]
    output: Option<String>,

    /// Separator between path segments (default: "#")
    #[arg(long)]
    delimiter: Option<String>,

    /// Levels of nesting to flatten below each key (unlimited if omitted)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Comma-separated keys to drop with their subtree (default: resource_name)
    #[arg(long)]
    exclude_keys: Option<String>,

    /// Comma-separated keys that add no path segment (default: value)
    #[arg(long)]
    exclude_prefixes: Option<String>,

    /// Comma-separated keys a single-key record collapses on; "none" disables collapsing
    #[arg(long)]
    flatten_single_keys: Option<String>,

    /// Store repeated fields and residual structure as JSON strings
    #[arg(long)]
    json_encode_repeated: Option<bool>,

    /// Keep enum codes instead of symbolic names
    #[arg(long)]
    no_enum_names: bool,

    /// Log progress every N rows (0 disables)
    #[arg(long)]
    progress_interval: Option<usize>,

    /// JSON file mapping keys to path overrides
    #[arg(long, value_name = "FILE")]
    path_overrides: Option<String>,

    /// JSON file mapping dotted field paths to enum types
    #[arg(long, value_name = "FILE")]
    enums: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = build_options(&args)?;
    let enums = load_enums(args.enums.as_deref())?;
    debug!(?options, "Resolved options");

    let rows = read_rows(args.input.as_deref(), args.ndjson)?;
    let messages: Vec<Message> = rows
        .iter()
        .filter_map(|row| Message::from_json(row, &enums))
        .collect();
    if messages.len() < rows.len() {
        info!(skipped = rows.len() - messages.len(), "Skipped rows that are not objects");
    }

    let table = response_to_table(messages, &options, None)?;

    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(File::create(path).with_context(|| format!("Failed to create {}", path))?),
        None => Box::new(std::io::stdout()),
    };
    let mut writer = TableWriter::new(BufWriter::new(output));
    writer.write_table(&table)?;
    writer.flush()?;

    Ok(())
}

fn build_options(args: &Args) -> Result<ReportOptions> {
    let mut paths = PathConfig::ads_defaults();
    if let Some(delimiter) = &args.delimiter {
        paths.delimiter = delimiter.clone();
    }
    if args.max_depth.is_some() {
        paths.max_depth = args.max_depth;
    }
    if let Some(keys) = &args.exclude_keys {
        paths.exclude_keys = split_list(keys);
    }
    if let Some(keys) = &args.exclude_prefixes {
        paths.exclude_prefixes = split_list(keys);
    }
    if let Some(keys) = &args.flatten_single_keys {
        paths.flatten_single_keys = match keys.trim() {
            "none" => None,
            keys => Some(split_list(keys)),
        };
    }
    if let Some(enabled) = args.json_encode_repeated {
        paths.json_encode_repeated = enabled;
    }
    if let Some(path) = &args.path_overrides {
        let overrides: BTreeMap<String, PathOverride> = read_json_file(path)?;
        paths.path_overrides.extend(overrides);
    }

    let mut options = ReportOptions {
        paths,
        substitute_enum_names: !args.no_enum_names,
        ..ReportOptions::default()
    };
    if let Some(interval) = args.progress_interval {
        options.progress_interval = interval;
    }
    Ok(options)
}

/// Split a comma-separated list; empty items are kept so that `""` can be
/// named as a collapse key.
fn split_list(list: &str) -> BTreeSet<String> {
    list.split(',').map(|s| s.trim().to_string()).collect()
}

fn load_enums(path: Option<&str>) -> Result<EnumBindings> {
    match path {
        Some(path) => {
            let enums: HashMap<String, EnumDescriptor> = read_json_file(path)?;
            info!(count = enums.len(), "Loaded enum bindings");
            Ok(EnumBindings::from(enums))
        }
        None => Ok(EnumBindings::new()),
    }
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
    serde_json::from_reader(BufReader::new(file)).with_context(|| format!("Failed to parse {}", path))
}

/// Read every input row. A top-level array is a list of rows; anything that
/// does not parse as one document is read line by line.
fn read_rows(input: Option<&str>, ndjson: bool) -> Result<Vec<Value>> {
    let mut reader: Box<dyn Read> = match input {
        Some(path) => Box::new(BufReader::new(File::open(path).with_context(|| format!("Failed to open {}", path))?)),
        None => Box::new(std::io::stdin()),
    };
    let mut content = Vec::new();
    reader.read_to_end(&mut content)?;

    if !ndjson {
        // simd-json parses in place, so work on a copy to keep the fallback input intact
        let mut scratch = content.clone();
        if let Ok(value) = simd_json::serde::from_slice::<Value>(&mut scratch) {
            return Ok(match value {
                Value::Array(rows) => rows,
                row => vec![row],
            });
        }
    }

    let content = String::from_utf8_lossy(&content);
    let mut rows = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row = serde_json::from_str(line)
            .with_context(|| format!("Failed to parse JSON on line {}", number + 1))?;
        rows.push(row);
    }
    Ok(rows)
}
