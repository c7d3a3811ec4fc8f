use crate::flatten::table::Table;
use anyhow::{Context, Result};
use std::io::Write;

/// Writes tables as JSON Lines, one object per row
///
/// Every line carries every column of the table so that downstream loaders
/// see a uniform shape; cells a row never had are written as null.
pub struct TableWriter<W: Write> {
    writer: W,
}

impl<W: Write> TableWriter<W> {
    pub fn new(writer: W) -> Self {
        TableWriter { writer }
    }

    pub fn write_table(&mut self, table: &Table) -> Result<()> {
        for record in table.records() {
            let json = serde_json::to_string(&record)
                .context("Failed to serialize row")?;
            writeln!(self.writer, "{}", json)
                .context("Failed to write row")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
