//! Shared row, header, and error model types for rowflow pipelines.
//!
//! This crate has no async or runtime dependencies so it can be shared by the
//! engine, embedding applications, and leaf-transform authors alike.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod address;
pub mod error;
pub mod header;
pub mod value;

pub use address::{CellAddress, CellRange, RelativeOffset};
pub use error::{ChannelError, ErrorCategory, ErrorRecord, PipelineError, RowError};
pub use header::{normalize, ColumnHeader, Selection, TableHeader};
pub use value::{Row, RowBatch, Value};
