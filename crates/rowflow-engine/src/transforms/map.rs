use std::sync::Arc;

use rowflow_types::{PipelineError, Row, TableHeader};

use crate::source::{Source, Transformer};

/// Per-row closure. Receives the (unchanged) header for position lookups.
pub type RowFn = dyn Fn(&TableHeader, &mut Row) -> Result<(), PipelineError> + Send + Sync;

/// Apply a closure to every row in place, keeping the header fixed.
#[derive(Clone)]
pub struct MapRows {
    name: String,
    f: Arc<RowFn>,
}

impl std::fmt::Debug for MapRows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapRows").field("name", &self.name).finish()
    }
}

impl MapRows {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TableHeader, &mut Row) -> Result<(), PipelineError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

impl Transformer for MapRows {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let header = source.shared_header();
        let f = self.f.clone();
        Ok(source.map_batches(header.clone(), move |mut batch| {
            for row in batch.rows_mut() {
                f(header.as_ref(), row)?;
            }
            Ok(batch)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use rowflow_types::{row, RowBatch, Value};

    #[tokio::test]
    async fn maps_rows_in_place() {
        let source = Source::from_batches(
            TableHeader::from_names(&["n"]),
            Context::root(),
            vec![RowBatch::new(vec![row![1], row![2]])],
        );
        let double = MapRows::new("double", |header, row| {
            let pos = header.position_of("n")?;
            if let Value::Int(n) = row[pos] {
                row[pos] = Value::Int(n * 2);
            }
            Ok(())
        });
        let rows = double.apply(source).unwrap().collect_rows().await.unwrap();
        assert_eq!(rows, vec![row![2], row![4]]);
    }

    #[tokio::test]
    async fn closure_errors_end_iteration() {
        let source = Source::from_batches(
            TableHeader::from_names(&["n"]),
            Context::root(),
            vec![RowBatch::new(vec![row![1]])],
        );
        let failing = MapRows::new("fail", |_, _| Err(PipelineError::config("NOPE", "no")));
        let err = failing.apply(source).unwrap().collect_rows().await.unwrap_err();
        assert_eq!(err.code(), "NOPE");
    }
}
