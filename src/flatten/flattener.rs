use crate::flatten::types::{FlatRecord, NestedRecord, PathConfig};
use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Converts one [`NestedRecord`] into one [`FlatRecord`]
pub struct PathFlattener {
    config: PathConfig,
}

/// What a flattened nested record turns into under its parent key
enum Flattened {
    /// Collapsed to one value stored at the parent key
    Single(Value),
    /// Keys relative to the parent key
    Spread(FlatRecord),
}

impl PathFlattener {
    pub fn new(config: PathConfig) -> Self {
        PathFlattener { config }
    }

    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    /// Flatten a nested record into delimiter-joined keys
    pub fn flatten(&self, record: &NestedRecord) -> Result<FlatRecord> {
        flatten_record(record, &self.config)
    }
}

/// Flatten one level of a nested record. Returned keys are relative to the
/// record itself.
fn flatten_record(record: &NestedRecord, config: &PathConfig) -> Result<FlatRecord> {
    let mut flat = Map::new();

    for (key, value) in record {
        let key_config = config.for_key(key);
        if key_config.exclude_keys.contains(key) {
            continue;
        }

        let segment = if key_config.exclude_prefixes.contains(key) {
            ""
        } else {
            key.as_str()
        };

        match value {
            Value::Object(_) | Value::Array(_) if key_config.max_depth == Some(0) => {
                let residual = encode_if(value.clone(), key_config.json_encode_repeated)?;
                flat.insert(segment.to_string(), residual);
            }
            Value::Object(child) => {
                let child_config = key_config.descend();
                let nested = flatten_record(child, &child_config)?;
                match collapse(nested, key_config.flatten_single_keys.as_ref()) {
                    Flattened::Single(single) => {
                        flat.insert(segment.to_string(), single);
                    }
                    Flattened::Spread(nested) => {
                        for (child_key, child_value) in nested {
                            flat.insert(key_config.join(segment, &child_key), child_value);
                        }
                    }
                }
            }
            Value::Array(items) => {
                let element_config = key_config.for_elements();
                let items = flatten_items(items, &element_config, key_config.flatten_single_keys.as_ref())?;
                let items = encode_if(Value::Array(items), key_config.json_encode_repeated)?;
                flat.insert(segment.to_string(), items);
            }
            scalar => {
                flat.insert(segment.to_string(), scalar.clone());
            }
        }
    }

    Ok(flat)
}

/// Flatten the elements of a repeated field, keeping each element in place
fn flatten_items(
    items: &[Value],
    config: &PathConfig,
    single_keys: Option<&BTreeSet<String>>,
) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(record) => {
                let nested = flatten_record(record, config)?;
                Ok(match collapse(nested, single_keys) {
                    Flattened::Single(single) => single,
                    Flattened::Spread(nested) => Value::Object(nested),
                })
            }
            Value::Array(inner) => Ok(Value::Array(flatten_items(inner, config, single_keys)?)),
            scalar => Ok(scalar.clone()),
        })
        .collect()
}

fn collapse(nested: FlatRecord, single_keys: Option<&BTreeSet<String>>) -> Flattened {
    let Some(single_keys) = single_keys else {
        return Flattened::Spread(nested);
    };

    if nested.is_empty() {
        return Flattened::Single(Value::Null);
    }

    if nested.len() == 1 {
        if let Some((key, _)) = nested.iter().next() {
            if single_keys.contains(key) {
                let value = nested.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
                return Flattened::Single(value);
            }
        }
    }

    Flattened::Spread(nested)
}

fn encode_if(value: Value, encode: bool) -> Result<Value> {
    if encode {
        let encoded = serde_json::to_string(&value).context("Failed to encode residual value")?;
        Ok(Value::String(encoded))
    } else {
        Ok(value)
    }
}
