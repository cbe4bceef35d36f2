//! Probes: capture a column's values into the context at one point of the
//! pipeline and restore them as a column somewhere else.

use rowflow_types::{PipelineError, Value};

use super::ensure_width;
use crate::source::{Source, Transformer};

/// Record every value of `column` under the probe `name`.
#[derive(Debug, Clone)]
pub struct ProbeCapture {
    name: String,
    column: String,
}

impl ProbeCapture {
    #[must_use]
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
        }
    }
}

impl Transformer for ProbeCapture {
    fn name(&self) -> &str {
        "probe_capture"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let position = source.header().position_of(&self.column)?;
        let context = source.context().clone();
        let name = self.name.clone();
        context.set_probe(name.clone(), Vec::new());
        let header = source.shared_header();
        Ok(source.map_batches(header, move |batch| {
            context.extend_probe(
                &name,
                batch
                    .rows()
                    .iter()
                    .map(|row| row.get(position).cloned().unwrap_or_default()),
            );
            Ok(batch)
        }))
    }
}

/// Append `column` holding the probed values by stream row index.
/// Rows past the end of the probe read null.
#[derive(Debug, Clone)]
pub struct ProbeRestore {
    name: String,
    column: String,
}

impl ProbeRestore {
    #[must_use]
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
        }
    }
}

impl Transformer for ProbeRestore {
    fn name(&self) -> &str {
        "probe_restore"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let (header, position) = source.header().add(&self.column);
        let width = header.physical_width();
        let context = source.context().clone();
        let name = self.name.clone();
        let mut index = 0usize;
        Ok(source.map_batches(header, move |mut batch| {
            for row in batch.rows_mut() {
                ensure_width(row, width);
                row[position] = context.probe_value(&name, index).unwrap_or(Value::Null);
                index += 1;
            }
            Ok(batch)
        }))
    }
}
