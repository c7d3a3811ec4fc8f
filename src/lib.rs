//! # ads-flatten - Ads Platform Response Flattening
//!
//! Turns the nested, dynamically shaped messages returned by an ads platform
//! into flat tabular records.
//!
//! ## Modules
//!
//! - **message**: the [`FieldListable`] view of a response message, plus an
//!   in-memory [`Message`] that can be built from JSON
//! - **flatten**: field extraction, path flattening and table assembly
//! - **query**: query templating with escaped parameters
//! - **report**: running queries through a [`ResponseSource`] into a [`Table`]
//! - **customer**: walking a manager's client customers
//! - **targeting**: campaign device and country targeting lookups
//! - **mutate**: campaign status, target CPA and budget changes
//!
//! ## Quick Start
//!
//! ```rust
//! use ads_flatten::flatten::{FieldExtractor, PathConfig, PathFlattener};
//! use ads_flatten::message::{EnumBindings, Message};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let row = json!({
//!     "campaign": {
//!         "resource_name": "customers/1/campaigns/7",
//!         "id": {"value": 7}
//!     },
//!     "metrics": {"clicks": {"value": 12}}
//! });
//!
//! let message = Message::from_json(&row, &EnumBindings::new()).unwrap_or_default();
//! let nested = FieldExtractor::new(true).extract(&message)?;
//! let flat = PathFlattener::new(PathConfig::ads_defaults()).flatten(&nested)?;
//!
//! assert_eq!(flat["campaign#id"], json!(7));
//! assert_eq!(flat["metrics#clicks"], json!(12));
//! assert!(!flat.contains_key("campaign#resource_name"));
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::{BufRead, Write};

pub mod message;
pub mod flatten;
pub mod progress;
pub mod error;
pub mod query;
pub mod report;
pub mod customer;
pub mod targeting;
pub mod mutate;

// Re-export commonly used types for convenience
pub use customer::CustomerHierarchy;
pub use error::{handle_permission_denied, AdsError, AdsResult};
pub use flatten::{FieldExtractor, FlatRecord, NestedRecord, PathConfig, PathFlattener, Table, TableWriter, ValueExtractor};
pub use message::{EnumBindings, EnumDescriptor, FieldListable, Message};
pub use query::Query;
pub use report::{response_to_table, ReportOptions, Reporter, ResponseSource};

/// Flatten newline-delimited JSON rows and write them as JSON Lines.
///
/// Every line is parsed into a [`Message`] (non-object lines are skipped),
/// then extracted and flattened under `options`. Returns the number of rows
/// written.
pub fn flatten_json_lines<R: BufRead, W: Write>(
    reader: R,
    writer: W,
    options: &ReportOptions,
    enums: &EnumBindings,
) -> Result<usize> {
    let mut messages = Vec::new();

    for line in reader.lines() {
        let line = line.context("Failed to read line")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .context("Failed to parse JSON")?;
        messages.extend(Message::from_json(&value, enums));
    }

    let table = response_to_table(messages, options, None)?;
    let mut writer = TableWriter::new(writer);
    writer.write_table(&table)?;
    writer.flush()?;

    Ok(table.len())
}
