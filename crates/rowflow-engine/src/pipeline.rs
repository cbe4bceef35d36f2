//! Pipeline assembly: ingestion, transform stages, output shaping, and
//! error rerouting.
//!
//! Stages run in this order:
//!
//! 1. ingestion derives the header from the raw stream,
//! 2. the configured transforms,
//! 3. `force_columns` projection (missing names null-filled),
//! 4. normalization,
//! 5. the error reroute wrapper when `error_column` is set and recovery
//!    stages are configured,
//! 6. the header row, unless `skip_header_row`.

use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};
use rowflow_types::{PipelineError, RowBatch};
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::ingest::{ingest, IngestOptions, InputHeaderMode};
use crate::reroute::ErrorReroute;
use crate::source::{compose, Source, Transformer};
use crate::transforms::{Normalize, Select};

/// Pipeline-wide options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub input_header: InputHeaderMode,
    #[serde(default)]
    pub force_columns_count: Option<usize>,
    /// Final column set; absent names are null-filled.
    #[serde(default)]
    pub force_columns: Option<Vec<String>>,
    #[serde(default)]
    pub skip_header_row: bool,
    /// Column exposing the caught error record to the recovery stages.
    #[serde(default)]
    pub error_column: Option<String>,
    /// Buffer length of channels created by fork stages that do not set
    /// their own.
    #[serde(default)]
    pub channel_buffer: usize,
}

impl PipelineOptions {
    #[must_use]
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            header: self.input_header,
            force_columns_count: self.force_columns_count,
        }
    }
}

/// A named, reusable pipeline definition.
#[derive(Clone, Default)]
pub struct Pipeline {
    name: String,
    options: PipelineOptions,
    transforms: Vec<Arc<dyn Transformer>>,
    recovery: Vec<Arc<dyn Transformer>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("options", &self.options)
            .field(
                "transforms",
                &self.transforms.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field(
                "recovery",
                &self.recovery.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn transform(mut self, transform: Arc<dyn Transformer>) -> Self {
        self.transforms.push(transform);
        self
    }

    #[must_use]
    pub fn transforms(mut self, transforms: impl IntoIterator<Item = Arc<dyn Transformer>>) -> Self {
        self.transforms.extend(transforms);
        self
    }

    /// Stages run over the one-row error record source when rerouting.
    #[must_use]
    pub fn recovery(mut self, recovery: impl IntoIterator<Item = Arc<dyn Transformer>>) -> Self {
        self.recovery.extend(recovery);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn pipeline_options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Compose every stage over an already-ingested source.
    ///
    /// # Errors
    ///
    /// Returns the first construction error. These are never rerouted.
    pub fn build(&self, input: Source) -> Result<Source, PipelineError> {
        input.context().set_channel_buffer(self.options.channel_buffer);
        let mut stages = self.transforms.clone();
        if let Some(columns) = &self.options.force_columns {
            stages.push(Arc::new(Select::new(columns.clone()).add_missing(true)));
        }
        stages.push(Arc::new(Normalize));
        // Without recovery stages an error propagates unchanged.
        if let (Some(column), false) = (&self.options.error_column, self.recovery.is_empty()) {
            stages.push(Arc::new(ErrorReroute::new(
                column.clone(),
                self.recovery.clone(),
            )));
        }

        let output = compose(input, &stages)?;
        if self.options.skip_header_row || output.header().is_empty() {
            return Ok(output);
        }
        let (header, context, batches) = output.into_parts();
        let header_row = RowBatch::header_row(&header.names());
        let batches = stream::once(async move { Ok(header_row) })
            .chain(batches)
            .boxed();
        Ok(Source::new(header, context, batches))
    }

    /// Ingest `raw` and build the pipeline over it.
    ///
    /// # Errors
    ///
    /// Returns ingestion or construction errors.
    pub async fn run<S>(&self, raw: S, context: Context) -> Result<Source, PipelineError>
    where
        S: Stream<Item = Result<RowBatch, PipelineError>> + Send + 'static,
    {
        tracing::info!(
            pipeline = %self.name,
            transforms = self.transforms.len(),
            reroute = self.options.error_column.is_some() && !self.recovery.is_empty(),
            "Starting pipeline"
        );
        let input = ingest(raw, &self.options.ingest_options(), context).await?;
        self.build(input)
    }

    /// [`Pipeline::run`] over in-memory batches.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::run`].
    pub async fn run_batches(
        &self,
        raw: Vec<RowBatch>,
        context: Context,
    ) -> Result<Source, PipelineError> {
        self.run(stream::iter(raw.into_iter().map(Ok)), context).await
    }
}
