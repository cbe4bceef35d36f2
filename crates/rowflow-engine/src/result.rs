//! Pipeline run summaries.

use std::time::Instant;

use rowflow_types::{PipelineError, RowBatch};
use serde::Serialize;

use crate::source::Source;

/// Result of draining a pipeline to completion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    /// Live column names of the output header.
    pub header: Vec<String>,
    pub batches: Vec<RowBatch>,
    /// Rows emitted, including the header row when one was emitted.
    pub rows: u64,
    pub batches_emitted: u64,
    pub duration_secs: f64,
}

impl PipelineResult {
    /// Every emitted row, in order.
    pub fn rows(&self) -> impl Iterator<Item = &rowflow_types::Row> {
        self.batches.iter().flat_map(RowBatch::rows)
    }
}

/// Pull every batch out of `source`.
///
/// # Errors
///
/// Returns the first error raised during iteration. Batches pulled before it
/// are discarded with the partial result.
pub async fn run_to_end(mut source: Source) -> Result<PipelineResult, PipelineError> {
    let start = Instant::now();
    let mut result = PipelineResult {
        header: source.header().names(),
        ..PipelineResult::default()
    };

    while let Some(batch) = source.next_batch().await {
        let batch = batch?;
        result.rows += batch.len() as u64;
        result.batches_emitted += 1;
        result.batches.push(batch);
    }
    result.duration_secs = start.elapsed().as_secs_f64();

    tracing::info!(
        scope = %source.context().path(),
        rows = result.rows,
        batches = result.batches_emitted,
        duration_secs = result.duration_secs,
        "Pipeline finished"
    );
    Ok(result)
}
