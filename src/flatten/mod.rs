//! Response flattening - nested protocol messages into flat tabular records
//!
//! Three stages run per response row:
//!
//! 1. [`FieldExtractor`] walks a message into a [`NestedRecord`], optionally
//!    naming enum codes and consulting a [`ValueExtractor`] per field.
//! 2. [`PathFlattener`] joins nested keys into [`FlatRecord`] paths under a
//!    [`PathConfig`].
//! 3. [`TableAssembler`] collects rows into a [`Table`] whose columns are the
//!    union of all row keys.

pub mod types;
pub mod extractor;
pub mod flattener;
pub mod table;
pub mod writer;

pub use types::{FlatRecord, NestedRecord, PathConfig, PathOverride};
pub use extractor::{FieldContext, FieldExtractor, ValueExtractor};
pub use flattener::PathFlattener;
pub use table::{Table, TableAssembler};
pub use writer::TableWriter;
