use crate::flatten::types::FlatRecord;
use crate::message::EnumDescriptor;
use crate::progress::ProgressLog;
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::info;

static TEMPLATE_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^{}]+)\}").unwrap());

/// Flat records in input order, plus the union of their keys
///
/// Rows keep exactly the keys they were built with; a column a row lacks
/// reads as null once the table is materialised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    column_set: HashSet<String>,
    rows: Vec<FlatRecord>,
}

impl Table {
    pub fn new() -> Self {
        Table::default()
    }

    pub fn push(&mut self, row: FlatRecord) {
        for key in row.keys() {
            if !self.column_set.contains(key) {
                self.column_set.insert(key.clone());
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in first-seen order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_set.contains(column)
    }

    pub fn rows(&self) -> &[FlatRecord] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<FlatRecord> {
        self.rows
    }

    /// Cell lookup; `None` when the row never had the column
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// One row with every column of the table, absent cells as null
    pub fn record(&self, row: usize) -> Option<FlatRecord> {
        let source = self.rows.get(row)?;
        Some(
            self.columns
                .iter()
                .map(|column| (column.clone(), source.get(column).cloned().unwrap_or(Value::Null)))
                .collect(),
        )
    }

    /// All rows as records carrying every column
    pub fn records(&self) -> impl Iterator<Item = FlatRecord> + '_ {
        (0..self.rows.len()).filter_map(move |row| self.record(row))
    }

    /// A whole column, absent cells as null; `None` if no row has it
    pub fn column(&self, column: &str) -> Option<Vec<Value>> {
        if !self.has_column(column) {
            return None;
        }
        Some(
            self.rows
                .iter()
                .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }

    /// Row-major cells in [`Table::columns`] order
    pub fn materialize(&self) -> Vec<Vec<Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }

    /// Distinct non-null values of a column in first-seen order
    pub fn distinct(&self, column: &str) -> Vec<Value> {
        let mut values: Vec<Value> = Vec::new();
        for cell in self.rows.iter().filter_map(|row| row.get(column)) {
            if !cell.is_null() && !values.contains(cell) {
                values.push(cell.clone());
            }
        }
        values
    }

    /// Set `column` on every row to the value computed from that row
    pub fn insert_column<F>(&mut self, column: &str, mut value: F)
    where
        F: FnMut(&FlatRecord) -> Value,
    {
        for row in &mut self.rows {
            let cell = value(row);
            row.insert(column.to_string(), cell);
        }
        if !self.column_set.contains(column) {
            self.column_set.insert(column.to_string());
            self.columns.push(column.to_string());
        }
    }

    /// Left join on `left_column == right_column`.
    ///
    /// Every left row is kept. A left row matching several right rows is
    /// repeated once per match, in right-table order. Null or missing keys
    /// never match. Where both sides carry a column the left value wins.
    pub fn left_join(&self, right: &Table, left_column: &str, right_column: &str) -> Table {
        let mut joined = Table::new();
        joined.extend_columns(&self.columns);
        joined.extend_columns(&right.columns);

        for row in &self.rows {
            let key = row.get(left_column).filter(|key| !key.is_null());
            let mut matched = false;

            if let Some(key) = key {
                for other in right.rows.iter().filter(|other| other.get(right_column) == Some(key)) {
                    let mut merged = row.clone();
                    for (column, value) in other {
                        if !merged.contains_key(column) {
                            merged.insert(column.clone(), value.clone());
                        }
                    }
                    joined.push(merged);
                    matched = true;
                }
            }

            if !matched {
                joined.push(row.clone());
            }
        }

        joined
    }

    fn extend_columns(&mut self, columns: &[String]) {
        for column in columns {
            if self.column_set.insert(column.clone()) {
                self.columns.push(column.clone());
            }
        }
    }

    /// Replace enum codes in one column with their names
    ///
    /// Works on scalar cells and arrays of codes; null cells stay null. A
    /// missing column is left alone.
    pub fn substitute_enum_names(&mut self, column: &str, enum_type: &EnumDescriptor) {
        for row in &mut self.rows {
            if let Some(cell) = row.get_mut(column) {
                *cell = enum_type.substitute(cell);
            }
        }
    }

    /// Build a nested lookup from `{column}` templates.
    ///
    /// For every row and every `(path, target)` pair, both templates are
    /// rendered from the row's cells; the rendered path is split on `.` into
    /// nested keys, and the rendered target is added to the sorted, de-duplicated
    /// list at the last key. Rows missing a referenced column, or holding null
    /// in it, are skipped for that pair.
    pub fn path_map(&self, templates: &[(&str, &str)]) -> Result<Map<String, Value>> {
        let mut lookup = Map::new();

        for row in &self.rows {
            for (path_template, target_template) in templates {
                let (Some(path), Some(target)) = (render(path_template, row), render(target_template, row)) else {
                    continue;
                };

                let mut components: Vec<&str> = path.split('.').collect();
                let leaf = components.pop().unwrap_or_default();

                let mut node = &mut lookup;
                for component in components {
                    let entry = node
                        .entry(component.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    node = match entry {
                        Value::Object(map) => map,
                        _ => bail!("Path '{}' runs through a list of values at '{}'", path, component),
                    };
                }

                let entry = node
                    .entry(leaf.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                let Value::Array(values) = entry else {
                    bail!("Path '{}' ends at a nested lookup, not a list", path);
                };
                let target = Value::String(target);
                if !values.contains(&target) {
                    values.push(target);
                    values.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                }
            }
        }

        Ok(lookup)
    }
}

impl FromIterator<FlatRecord> for Table {
    fn from_iter<I: IntoIterator<Item = FlatRecord>>(iter: I) -> Self {
        let mut table = Table::new();
        table.extend(iter);
        table
    }
}

impl Extend<FlatRecord> for Table {
    fn extend<I: IntoIterator<Item = FlatRecord>>(&mut self, iter: I) {
        for row in iter {
            self.push(row);
        }
    }
}

/// Accumulates flattened rows into a [`Table`], logging progress as it goes
pub struct TableAssembler {
    table: Table,
    progress: ProgressLog,
}

impl TableAssembler {
    pub fn new(progress_interval: usize) -> Self {
        TableAssembler {
            table: Table::new(),
            progress: ProgressLog::new("Flattening response rows", progress_interval),
        }
    }

    pub fn push(&mut self, row: FlatRecord) {
        self.table.push(row);
        self.progress.tick();
    }

    pub fn finish(self) -> Table {
        info!(rows = self.progress.count(), columns = self.table.columns().len(), "Parsed response rows");
        self.table
    }
}

fn render(template: &str, row: &FlatRecord) -> Option<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for captures in TEMPLATE_FIELD.captures_iter(template) {
        let whole = captures.get(0)?;
        let cell = row.get(&captures[1])?;
        let text = match cell {
            Value::Null => return None,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered.push_str(&template[last..whole.start()]);
        rendered.push_str(&text);
        last = whole.end();
    }

    rendered.push_str(&template[last..]);
    Some(rendered)
}
