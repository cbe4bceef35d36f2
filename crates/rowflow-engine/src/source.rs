//! Source/Transformer protocol.
//!
//! A [`Source`] is an immutable value: a header, a context, and a lazy stream
//! of row batches. A [`Transformer`] derives a new source from an old one. It
//! must compute the new header synchronously, before any batch is pulled, and
//! defer row rewriting to iteration.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, BoxStream, StreamExt};
use rowflow_types::{PipelineError, Row, RowBatch, TableHeader};
use tokio::task::{JoinError, JoinHandle};

use crate::channel::RowChannel;
use crate::context::Context;

/// Lazily-evaluated stream of batches. Errors end iteration.
pub type BatchStream = BoxStream<'static, Result<RowBatch, PipelineError>>;

/// A header, a context, and the batches that conform to that header.
pub struct Source {
    header: Arc<TableHeader>,
    context: Context,
    batches: BatchStream,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("header", &self.header.names())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Source {
    #[must_use]
    pub fn new(header: impl Into<Arc<TableHeader>>, context: Context, batches: BatchStream) -> Self {
        Self {
            header: header.into(),
            context,
            batches,
        }
    }

    /// Source over in-memory batches.
    #[must_use]
    pub fn from_batches(header: TableHeader, context: Context, batches: Vec<RowBatch>) -> Self {
        Self::new(header, context, stream::iter(batches.into_iter().map(Ok)).boxed())
    }

    /// Source with a header and no rows.
    #[must_use]
    pub fn empty(header: TableHeader, context: Context) -> Self {
        Self::new(header, context, stream::empty().boxed())
    }

    #[must_use]
    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    #[must_use]
    pub fn shared_header(&self) -> Arc<TableHeader> {
        self.header.clone()
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[must_use]
    pub fn into_parts(self) -> (Arc<TableHeader>, Context, BatchStream) {
        (self.header, self.context, self.batches)
    }

    /// Same batches under an overridden header.
    #[must_use]
    pub fn with_header(self, header: impl Into<Arc<TableHeader>>) -> Self {
        Self {
            header: header.into(),
            ..self
        }
    }

    /// Replace the header and rewrite every batch with `f`, lazily.
    #[must_use]
    pub fn map_batches<F>(self, header: impl Into<Arc<TableHeader>>, mut f: F) -> Self
    where
        F: FnMut(RowBatch) -> Result<RowBatch, PipelineError> + Send + 'static,
    {
        let batches = self
            .batches
            .map(move |item| item.and_then(&mut f))
            .boxed();
        Self {
            header: header.into(),
            context: self.context,
            batches,
        }
    }

    /// Pull the next batch.
    pub async fn next_batch(&mut self) -> Option<Result<RowBatch, PipelineError>> {
        self.batches.next().await
    }

    /// Drain every batch into a flat row list.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while iterating.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>, PipelineError> {
        let mut rows = Vec::new();
        while let Some(batch) = self.next_batch().await {
            rows.extend(batch?);
        }
        Ok(rows)
    }
}

/// A pure `Source -> Source` stage.
pub trait Transformer: Send + Sync {
    /// Short stage name used in logs.
    fn name(&self) -> &str;

    /// Derive the downstream source.
    ///
    /// # Errors
    ///
    /// Returns a `Config` or `Header` error if the stage cannot be built
    /// against the upstream header.
    fn apply(&self, source: Source) -> Result<Source, PipelineError>;
}

/// Apply `transforms` left to right.
///
/// # Errors
///
/// Returns the first construction error.
pub fn compose(source: Source, transforms: &[Arc<dyn Transformer>]) -> Result<Source, PipelineError> {
    transforms.iter().try_fold(source, |source, transform| {
        tracing::trace!(
            stage = transform.name(),
            context = %source.context().path(),
            "Composing stage"
        );
        transform.apply(source)
    })
}

pub(crate) fn join_failure(task: &str, err: &JoinError) -> PipelineError {
    PipelineError::Infrastructure(anyhow::anyhow!("{task} task panicked: {err}"))
}

/// Spawn `producer` and close `channel` when it finishes, successfully or not.
fn spawn_producer(channel: RowChannel, producer: Driver) -> JoinHandle<Result<(), PipelineError>> {
    tokio::spawn(async move {
        let result = producer.await;
        channel.close();
        result
    })
}

type Driver = BoxFuture<'static, Result<(), PipelineError>>;

enum DriverState {
    Idle(Driver),
    Running(JoinHandle<Result<(), PipelineError>>),
    Finished,
}

/// Closes the channel when the consuming stream is dropped, so an early-
/// stopping consumer releases its producer.
struct Drain {
    channel: RowChannel,
    task: &'static str,
    driver: DriverState,
}

impl Drop for Drain {
    fn drop(&mut self) {
        self.channel.close();
    }
}

/// Stream a channel fed by `driver` until the closed sentinel, then surface
/// the driver's outcome. The driver is spawned on first poll and the channel
/// is closed once it returns.
pub(crate) fn drain_channel<F>(channel: RowChannel, task: &'static str, driver: F) -> BatchStream
where
    F: std::future::Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    let state = Drain {
        channel,
        task,
        driver: DriverState::Idle(driver.boxed()),
    };
    stream::unfold(state, |mut state| async move {
        state.driver = match std::mem::replace(&mut state.driver, DriverState::Finished) {
            DriverState::Idle(driver) => {
                DriverState::Running(spawn_producer(state.channel.clone(), driver))
            }
            other => other,
        };
        if let Some(batch) = state.channel.take().await {
            return Some((Ok(batch), state));
        }
        let DriverState::Running(handle) =
            std::mem::replace(&mut state.driver, DriverState::Finished)
        else {
            return None;
        };
        match handle.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some((Err(err), state)),
            Err(join) => Some((Err(join_failure(state.task, &join)), state)),
        }
    })
    .boxed()
}
