//! Streaming row-batch transformation engine.
//!
//! Pipelines are chains of [`Transformer`]s over a [`Source`]: a header plus
//! a lazy stream of row batches. Higher-order stages in [`fork`] run branch
//! pipelines concurrently over [`RowChannel`]s; [`ErrorReroute`] replaces a
//! failed stream with the output of a recovery pipeline.

pub mod channel;
pub mod config;
pub mod context;
pub mod expression;
pub mod fork;
pub mod ingest;
pub mod pipeline;
pub mod reroute;
pub mod result;
pub mod source;
pub mod transforms;

// Re-export public API for convenience
pub use channel::RowChannel;
pub use context::Context;
pub use expression::{ColumnIndex, Expression, ExpressionCompiler, RowState};
pub use fork::{Fork, ForkMerge, SplitIn};
pub use ingest::{ingest, ingest_batches, IngestOptions, InputHeaderMode};
pub use pipeline::{Pipeline, PipelineOptions};
pub use reroute::ErrorReroute;
pub use result::{run_to_end, PipelineResult};
pub use source::{compose, BatchStream, Source, Transformer};

pub use rowflow_types::{PipelineError, Row, RowBatch, TableHeader, Value};
