//! Row-count progress reporting through `tracing`

use tracing::info;

/// Counts processed rows and logs every `interval` rows
///
/// Purely observational: nothing about the data depends on it.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    label: &'static str,
    interval: usize,
    count: usize,
}

impl ProgressLog {
    /// An interval of 0 disables the periodic message
    pub fn new(label: &'static str, interval: usize) -> Self {
        ProgressLog {
            label,
            interval,
            count: 0,
        }
    }

    pub fn tick(&mut self) {
        self.count += 1;
        if self.interval > 0 && self.count % self.interval == 0 {
            info!(rows = self.count, "{}", self.label);
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
