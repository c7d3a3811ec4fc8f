use serde::Deserialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

/// Field name → scalar, nested record, or array, in field declaration order
pub type NestedRecord = Map<String, Value>;

/// Delimiter-joined path → scalar or encoded value, one per response row
pub type FlatRecord = Map<String, Value>;

/// Configuration for the flattening process
///
/// A config describes how the keys at one level of a nested record are
/// flattened. Configs for deeper levels are derived with [`PathConfig::for_key`]
/// and [`PathConfig::descend`]; a config is never changed in place once
/// flattening starts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Keys dropped together with their subtree
    pub exclude_keys: BTreeSet<String>,

    /// Keys that add no path segment; their children still report
    pub exclude_prefixes: BTreeSet<String>,

    /// Separator between path segments
    pub delimiter: String,

    /// Levels of nesting flattened below each key (None = unlimited)
    pub max_depth: Option<usize>,

    /// Store repeated fields and residual structure as JSON strings
    pub json_encode_repeated: bool,

    /// A nested record whose only flattened key is in this set collapses to
    /// that key's value. When set, an empty nested record becomes null.
    pub flatten_single_keys: Option<BTreeSet<String>>,

    /// Per-key overrides applied to a key and everything below it
    pub path_overrides: BTreeMap<String, PathOverride>,
}

impl Default for PathConfig {
    fn default() -> Self {
        PathConfig {
            exclude_keys: BTreeSet::new(),
            exclude_prefixes: BTreeSet::new(),
            delimiter: String::from("#"),
            max_depth: None,
            json_encode_repeated: false,
            flatten_single_keys: Some(BTreeSet::from([String::new()])),
            path_overrides: BTreeMap::new(),
        }
    }
}

/// Field-by-field override of a [`PathConfig`]; unset fields inherit
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PathOverride {
    pub exclude_keys: Option<BTreeSet<String>>,
    pub exclude_prefixes: Option<BTreeSet<String>>,
    pub delimiter: Option<String>,
    pub max_depth: Option<usize>,
    pub json_encode_repeated: Option<bool>,
    pub flatten_single_keys: Option<BTreeSet<String>>,
    pub path_overrides: Option<BTreeMap<String, PathOverride>>,
}

impl PathConfig {
    /// Defaults for ads platform responses: resource names dropped, wrapper
    /// `value` fields folded into their parent, `#` joined keys, repeated
    /// fields JSON-encoded.
    pub fn ads_defaults() -> Self {
        PathConfig {
            exclude_keys: BTreeSet::from([String::from("resource_name")]),
            exclude_prefixes: BTreeSet::from([String::from("value")]),
            json_encode_repeated: true,
            ..PathConfig::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn exclude_key(mut self, key: impl Into<String>) -> Self {
        self.exclude_keys.insert(key.into());
        self
    }

    pub fn exclude_prefix(mut self, key: impl Into<String>) -> Self {
        self.exclude_prefixes.insert(key.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_json_encode_repeated(mut self, enabled: bool) -> Self {
        self.json_encode_repeated = enabled;
        self
    }

    pub fn with_flatten_single_keys<I, S>(mut self, keys: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flatten_single_keys = keys.map(|keys| keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, path_override: PathOverride) -> Self {
        self.path_overrides.insert(key.into(), path_override);
        self
    }

    /// Config in effect for `key` at this level: the override registered for
    /// `key`, if any, merged over this config.
    pub fn for_key(&self, key: &str) -> Cow<'_, PathConfig> {
        match self.path_overrides.get(key) {
            Some(path_override) => Cow::Owned(self.merged(path_override)),
            None => Cow::Borrowed(self),
        }
    }

    /// Config for the level below, with one less level of depth remaining
    pub fn descend(&self) -> Cow<'_, PathConfig> {
        match self.max_depth {
            None => Cow::Borrowed(self),
            Some(depth) => Cow::Owned(PathConfig {
                max_depth: Some(depth.saturating_sub(1)),
                ..self.clone()
            }),
        }
    }

    /// Config for the elements of a repeated field
    ///
    /// Elements are never JSON-encoded individually; the repeated field as a
    /// whole is encoded by its parent.
    pub fn for_elements(&self) -> PathConfig {
        PathConfig {
            json_encode_repeated: false,
            ..self.descend().into_owned()
        }
    }

    /// Join a parent path and a child path, skipping empty sides
    pub fn join(&self, parent: &str, child: &str) -> String {
        match (parent.is_empty(), child.is_empty()) {
            (true, _) => child.to_string(),
            (_, true) => parent.to_string(),
            _ => format!("{}{}{}", parent, self.delimiter, child),
        }
    }

    fn merged(&self, path_override: &PathOverride) -> PathConfig {
        PathConfig {
            exclude_keys: path_override
                .exclude_keys
                .clone()
                .unwrap_or_else(|| self.exclude_keys.clone()),
            exclude_prefixes: path_override
                .exclude_prefixes
                .clone()
                .unwrap_or_else(|| self.exclude_prefixes.clone()),
            delimiter: path_override
                .delimiter
                .clone()
                .unwrap_or_else(|| self.delimiter.clone()),
            max_depth: path_override.max_depth.or(self.max_depth),
            json_encode_repeated: path_override
                .json_encode_repeated
                .unwrap_or(self.json_encode_repeated),
            flatten_single_keys: path_override
                .flatten_single_keys
                .clone()
                .or_else(|| self.flatten_single_keys.clone()),
            path_overrides: path_override
                .path_overrides
                .clone()
                .unwrap_or_else(|| self.path_overrides.clone()),
        }
    }
}

impl PathOverride {
    pub fn exclude_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude_prefixes<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_prefixes = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn json_encode_repeated(mut self, enabled: bool) -> Self {
        self.json_encode_repeated = Some(enabled);
        self
    }

    pub fn nested(mut self, key: impl Into<String>, path_override: PathOverride) -> Self {
        self.path_overrides
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), path_override);
        self
    }
}
