//! Core transformers: header reshaping, row mapping, probes, and
//! expression-driven columns.

mod columns;
mod expr;
mod map;
mod probe;

pub use columns::{AddColumn, Normalize, RemoveColumns, RenameColumn, Select};
pub use expr::{AssertRows, ComputeColumn};
pub use map::{MapRows, RowFn};
pub use probe::{ProbeCapture, ProbeRestore};

use rowflow_types::{PipelineError, Row, RowBatch, RowError, Value};

/// Grow `row` with nulls so that `width` slots exist. Never truncates.
pub(crate) fn ensure_width(row: &mut Row, width: usize) {
    if row.len() < width {
        row.resize(width, Value::Null);
    }
}

/// Attach row coordinates to an evaluation failure. Header errors keep their
/// own category so "column not found" stays recognizable.
pub(crate) fn row_failure(
    err: PipelineError,
    batch: RowBatch,
    row_index: usize,
    column_index: Option<usize>,
    row_number: u64,
) -> PipelineError {
    match err {
        PipelineError::Header { .. } | PipelineError::Row(_) => err,
        other => RowError {
            code: other.code().to_string(),
            message: other.message(),
            batch,
            row_index,
            column_index,
            row_number,
        }
        .into(),
    }
}
