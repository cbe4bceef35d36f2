//! Error rerouting.
//!
//! Construction errors are returned synchronously and never rerouted. An
//! error raised while batches are being pulled is turned into a one-row
//! [`ErrorRecord`] source, run through the recovery transforms, projected
//! onto the header the failed run already committed to, and emitted in
//! place of the rest of the stream.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use rowflow_types::{ErrorRecord, PipelineError, RowBatch, TableHeader};

use crate::context::Context;
use crate::source::{compose, BatchStream, Source, Transformer};
use crate::transforms::{Normalize, Select};

/// Wrap everything upstream; on a reroutable iteration error, emit the
/// output of `recovery` instead. With no recovery stages every error
/// propagates unchanged.
#[derive(Clone)]
pub struct ErrorReroute {
    error_column: String,
    recovery: Vec<Arc<dyn Transformer>>,
}

impl ErrorReroute {
    #[must_use]
    pub fn new(error_column: impl Into<String>, recovery: Vec<Arc<dyn Transformer>>) -> Self {
        Self {
            error_column: error_column.into(),
            recovery,
        }
    }

    /// Build the substitute source for `error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the recovery transforms cannot be composed.
    pub fn recover(
        &self,
        error: &PipelineError,
        committed: &TableHeader,
        context: &Context,
    ) -> Result<Source, PipelineError> {
        let record = ErrorRecord::from_error(error);
        let synthetic = Source::from_batches(
            TableHeader::from_names(&[self.error_column.as_str()]),
            context.child("recovery"),
            vec![RowBatch::new(vec![vec![record.to_value()]])],
        );
        let recovered = compose(synthetic, &self.recovery)?;
        let projection: Vec<Arc<dyn Transformer>> = vec![
            Arc::new(Select::new(committed.names()).add_missing(true)),
            Arc::new(Normalize),
        ];
        compose(recovered, &projection)
    }
}

impl Transformer for ErrorReroute {
    fn name(&self) -> &str {
        "error_reroute"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let (header, context, upstream) = source.into_parts();
        let state = RerouteState {
            reroute: self.clone(),
            header: header.clone(),
            context: context.clone(),
            phase: Phase::Main(upstream),
        };
        let batches = stream::unfold(state, RerouteState::step).boxed();
        Ok(Source::new(header, context, batches))
    }
}

enum Phase {
    Main(BatchStream),
    Recovering(BatchStream),
    Done,
}

struct RerouteState {
    reroute: ErrorReroute,
    header: Arc<TableHeader>,
    context: Context,
    phase: Phase,
}

impl RerouteState {
    async fn step(mut self) -> Option<(Result<RowBatch, PipelineError>, Self)> {
        loop {
            match &mut self.phase {
                Phase::Main(upstream) => match upstream.next().await {
                    Some(Ok(batch)) => return Some((Ok(batch), self)),
                    Some(Err(err)) if err.is_reroutable() && !self.reroute.recovery.is_empty() => {
                        tracing::warn!(
                            category = %err.category(),
                            code = err.code(),
                            error_column = %self.reroute.error_column,
                            "Rerouting pipeline error to recovery"
                        );
                        match self.reroute.recover(&err, &self.header, &self.context) {
                            Ok(recovered) => {
                                self.phase = Phase::Recovering(recovered.into_parts().2);
                            }
                            Err(recovery_err) => {
                                self.phase = Phase::Done;
                                return Some((Err(recovery_err), self));
                            }
                        }
                    }
                    Some(Err(err)) => {
                        self.phase = Phase::Done;
                        return Some((Err(err), self));
                    }
                    None => return None,
                },
                Phase::Recovering(recovered) => {
                    let item = recovered.next().await?;
                    return Some((item, self));
                }
                Phase::Done => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::MapRows;
    use rowflow_types::{row, Value};

    fn failing_source() -> Source {
        let upstream = stream::iter(vec![
            Ok(RowBatch::new(vec![row![1, "ok"]])),
            Err(PipelineError::header(
                "COLUMN_NOT_FOUND",
                "column not found: amount",
                &[],
            )),
            Ok(RowBatch::new(vec![row![2, "never"]])),
        ])
        .boxed();
        Source::new(
            TableHeader::from_names(&["name", "message"]),
            Context::root(),
            upstream,
        )
    }

    /// Spreads the error record into `name` and `message` columns.
    fn unpack() -> Vec<Arc<dyn Transformer>> {
        vec![
            Arc::new(crate::transforms::AddColumn::new("name", Value::Null)),
            Arc::new(crate::transforms::AddColumn::new("message", Value::Null)),
            Arc::new(MapRows::new("unpack", |header, row| {
                let record = row[header.position_of("error")?].clone();
                row[header.position_of("name")?] = record.get("name").cloned().unwrap_or_default();
                row[header.position_of("message")?] =
                    record.get("message").cloned().unwrap_or_default();
                Ok(())
            })),
        ]
    }

    #[tokio::test]
    async fn reroutes_iteration_error_into_one_row() {
        let out = ErrorReroute::new("error", unpack())
            .apply(failing_source())
            .unwrap();
        assert_eq!(out.header().names(), vec!["name", "message"]);
        let rows = out.collect_rows().await.unwrap();
        assert_eq!(
            rows,
            vec![
                row![1, "ok"],
                row!["HeaderError", "column not found: amount"],
            ]
        );
    }

    #[tokio::test]
    async fn config_errors_propagate() {
        let upstream = stream::iter(vec![Err(PipelineError::config("BAD", "bad"))]).boxed();
        let source = Source::new(TableHeader::from_names(&["a"]), Context::root(), upstream);
        let out = ErrorReroute::new("error", unpack()).apply(source).unwrap();
        assert_eq!(out.collect_rows().await.unwrap_err().code(), "BAD");
    }

    #[tokio::test]
    async fn recovery_output_is_projected_onto_committed_header() {
        let keep_record: Vec<Arc<dyn Transformer>> =
            vec![Arc::new(crate::transforms::Select::new(["error"]))];
        let out = ErrorReroute::new("error", keep_record)
            .apply(failing_source())
            .unwrap();
        let rows = out.collect_rows().await.unwrap();
        // The error column is not part of the committed header, so the
        // substitute row is all nulls.
        assert_eq!(rows[1], row![Value::Null, Value::Null]);
    }

    #[tokio::test]
    async fn without_recovery_the_error_propagates() {
        let mut out = ErrorReroute::new("error", Vec::new())
            .apply(failing_source())
            .unwrap();
        assert_eq!(out.next_batch().await.unwrap().unwrap().rows(), &[row![1, "ok"]]);
        let err = out.next_batch().await.unwrap().unwrap_err();
        assert_eq!(err.code(), "COLUMN_NOT_FOUND");
        assert!(out.next_batch().await.is_none());
    }
}
