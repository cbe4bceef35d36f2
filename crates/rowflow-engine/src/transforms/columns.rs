use std::sync::Arc;

use rowflow_types::{PipelineError, Value};

use super::ensure_width;
use crate::source::{Source, Transformer};

// ---------------------------------------------------------------------------
// Select
// ---------------------------------------------------------------------------

/// Project and reorder columns by name.
#[derive(Debug, Clone)]
pub struct Select {
    names: Vec<String>,
    reorder: bool,
    add_missing: bool,
}

impl Select {
    #[must_use]
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            reorder: true,
            add_missing: false,
        }
    }

    /// Keep the upstream column order instead of the requested one.
    #[must_use]
    pub fn reorder(mut self, reorder: bool) -> Self {
        self.reorder = reorder;
        self
    }

    /// Synthesize all-null columns for names the upstream lacks.
    #[must_use]
    pub fn add_missing(mut self, add_missing: bool) -> Self {
        self.add_missing = add_missing;
        self
    }
}

impl Transformer for Select {
    fn name(&self) -> &str {
        "select"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let selection = source
            .header()
            .select(&self.names, self.reorder, self.add_missing)?;
        if selection.added_positions.is_empty() {
            return Ok(source.with_header(selection.header));
        }
        let width = selection.header.physical_width();
        let added = selection.added_positions;
        Ok(source.map_batches(selection.header, move |mut batch| {
            for row in batch.rows_mut() {
                ensure_width(row, width);
                for &position in &added {
                    row[position] = Value::Null;
                }
            }
            Ok(batch)
        }))
    }
}

// ---------------------------------------------------------------------------
// Normalize
// ---------------------------------------------------------------------------

/// Compact the header and gather rows into the compacted layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalize;

impl Transformer for Normalize {
    fn name(&self) -> &str {
        "normalize"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let upstream = source.shared_header();
        if upstream.is_normalized() {
            return Ok(source);
        }
        let header = upstream.normalize();
        Ok(source.map_batches(header, move |batch| Ok(upstream.normalize_batch(batch))))
    }
}

// ---------------------------------------------------------------------------
// Remove / rename
// ---------------------------------------------------------------------------

/// Soft-delete every live column with one of the given names.
#[derive(Debug, Clone)]
pub struct RemoveColumns {
    names: Vec<String>,
}

impl RemoveColumns {
    #[must_use]
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Transformer for RemoveColumns {
    fn name(&self) -> &str {
        "remove"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let mut header = source.header().clone();
        for name in &self.names {
            header = header.remove(name, None)?;
        }
        Ok(source.with_header(header))
    }
}

#[derive(Debug, Clone)]
pub struct RenameColumn {
    from: String,
    to: String,
    occurrence: Option<usize>,
}

impl RenameColumn {
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            occurrence: None,
        }
    }

    /// Only rename the `n`-th (0-based) live column named `from`.
    #[must_use]
    pub fn occurrence(mut self, n: usize) -> Self {
        self.occurrence = Some(n);
        self
    }
}

impl Transformer for RenameColumn {
    fn name(&self) -> &str {
        "rename"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let header = source
            .header()
            .rename(&self.from, &self.to, self.occurrence)?;
        Ok(source.with_header(header))
    }
}

// ---------------------------------------------------------------------------
// Add
// ---------------------------------------------------------------------------

/// Append a column filled with a constant.
#[derive(Debug, Clone)]
pub struct AddColumn {
    column: String,
    value: Value,
}

impl AddColumn {
    #[must_use]
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl Transformer for AddColumn {
    fn name(&self) -> &str {
        "add"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let (header, position) = source.header().add(&self.column);
        let width = header.physical_width();
        let value = self.value.clone();
        Ok(source.map_batches(Arc::new(header), move |mut batch| {
            for row in batch.rows_mut() {
                ensure_width(row, width);
                // A recycled slot still holds the deleted column's cells.
                row[position] = value.clone();
            }
            Ok(batch)
        }))
    }
}
