use std::sync::Arc;

use futures_util::StreamExt;
use rowflow_types::{PipelineError, TableHeader};
use tokio::task::JoinSet;

use super::branch_input;
use crate::channel::RowChannel;
use crate::source::{compose, drain_channel, join_failure, BatchStream, Source, Transformer};
use crate::transforms::{Normalize, Select};

/// Run N branches concurrently over copies of the main stream and merge
/// their outputs.
///
/// Every branch is projected onto `output_columns` (missing columns are
/// null-filled) so all merged batches share one shape. Interleaving across
/// branches is nondeterministic; order within one branch is kept.
#[derive(Clone)]
pub struct ForkMerge {
    label: &'static str,
    branches: Vec<Vec<Arc<dyn Transformer>>>,
    output_columns: Vec<String>,
    buffer: Option<usize>,
}

impl ForkMerge {
    #[must_use]
    pub fn new<S: Into<String>>(
        branches: Vec<Vec<Arc<dyn Transformer>>>,
        output_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            label: "fork_merge",
            branches,
            output_columns: output_columns.into_iter().map(Into::into).collect(),
            buffer: None,
        }
    }

    /// Fork-and-merge where the main stream itself joins the merge as an
    /// identity branch alongside `branches`.
    #[must_use]
    pub fn merge_fork<S: Into<String>>(
        branches: Vec<Vec<Arc<dyn Transformer>>>,
        output_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut all = Vec::with_capacity(branches.len() + 1);
        all.push(Vec::new());
        all.extend(branches);
        Self {
            label: "merge_fork",
            ..Self::new(all, output_columns)
        }
    }

    /// Buffer length of every producer channel and of the merge channel.
    #[must_use]
    pub fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

impl Transformer for ForkMerge {
    fn name(&self) -> &str {
        self.label
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        if self.branches.is_empty() {
            return Err(PipelineError::config(
                "NO_BRANCHES",
                format!("{} needs at least one branch", self.label),
            ));
        }
        if self.output_columns.is_empty() {
            return Err(PipelineError::config(
                "NO_OUTPUT_COLUMNS",
                format!("{} needs output columns", self.label),
            ));
        }

        let (header, context, upstream) = source.into_parts();
        let buffer = self.buffer.unwrap_or_else(|| context.channel_buffer());
        let normalized = Arc::new(header.normalize());
        let shape: Vec<Arc<dyn Transformer>> = vec![
            Arc::new(Select::new(self.output_columns.clone()).add_missing(true)),
            Arc::new(Normalize),
        ];

        let mut inputs = Vec::with_capacity(self.branches.len());
        let mut outputs = Vec::with_capacity(self.branches.len());
        for (index, branch) in self.branches.iter().enumerate() {
            let channel = RowChannel::new(buffer);
            let input = branch_input(
                normalized.clone(),
                context.child(format!("branch-{index}")),
                &channel,
            );
            let output = compose(compose(input, branch)?, &shape)?;
            outputs.push(output.into_parts().2);
            inputs.push(channel);
        }

        let merge = RowChannel::new(buffer);
        let run = MergeRun {
            upstream,
            header,
            inputs,
            outputs,
            merge: merge.clone(),
        };
        Ok(Source::new(
            TableHeader::from_names(&self.output_columns),
            context,
            drain_channel(merge, "fork-merge", run.supervise()),
        ))
    }
}

struct MergeRun {
    upstream: BatchStream,
    header: Arc<TableHeader>,
    inputs: Vec<RowChannel>,
    outputs: Vec<BatchStream>,
    merge: RowChannel,
}

impl MergeRun {
    /// Spawn the producer and one relay per branch; report the first failure.
    async fn supervise(self) -> Result<(), PipelineError> {
        let Self {
            upstream,
            header,
            inputs,
            outputs,
            merge,
        } = self;
        let branches = outputs.len();
        tracing::debug!(branches, "Fork-merge started");

        let mut tasks: JoinSet<Result<(), PipelineError>> = JoinSet::new();
        for (index, output) in outputs.into_iter().enumerate() {
            tasks.spawn(relay(index, output, inputs[index].clone(), merge.clone()));
        }
        tasks.spawn(produce(upstream, header, inputs.clone()));

        let mut first_error: Option<PipelineError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!("Fork-merge branch failed: {}", error);
                    if first_error.is_none() {
                        first_error = Some(error);
                        for input in &inputs {
                            input.close();
                        }
                        merge.close();
                        tasks.abort_all();
                    }
                }
                Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {
                    // Expected: siblings cancelled after the first failure.
                }
                Err(join_err) => {
                    for input in &inputs {
                        input.close();
                    }
                    tasks.abort_all();
                    return Err(join_failure("fork-merge", &join_err));
                }
            }
        }

        tracing::debug!(branches, ok = first_error.is_none(), "Fork-merge finished");
        first_error.map_or(Ok(()), Err)
    }
}

/// Push a clone of every normalized batch to each branch still open.
async fn produce(
    mut upstream: BatchStream,
    header: Arc<TableHeader>,
    inputs: Vec<RowChannel>,
) -> Result<(), PipelineError> {
    let mut open = vec![true; inputs.len()];
    let mut result = Ok(());
    while let Some(batch) = upstream.next().await {
        let batch = match batch {
            Ok(batch) => header.normalize_batch(batch),
            Err(err) => {
                result = Err(err);
                break;
            }
        };
        for (input, is_open) in inputs.iter().zip(open.iter_mut()) {
            if *is_open && input.put(batch.clone()).await.is_err() {
                *is_open = false;
            }
        }
        if !open.iter().any(|o| *o) {
            tracing::debug!("Every fork-merge branch closed; producer stopping early");
            break;
        }
    }
    for input in &inputs {
        input.close();
    }
    result
}

/// Copy one branch's output into the merge channel.
async fn relay(
    index: usize,
    mut output: BatchStream,
    input: RowChannel,
    merge: RowChannel,
) -> Result<(), PipelineError> {
    let mut batches = 0u64;
    let result = loop {
        match output.next().await {
            Some(Ok(batch)) => {
                if merge.put(batch).await.is_err() {
                    break Ok(());
                }
                batches += 1;
            }
            Some(Err(err)) => break Err(err),
            None => break Ok(()),
        }
    };
    // Tell the producer this branch no longer reads.
    input.close();
    tracing::debug!(branch = index, batches, "Fork-merge relay finished");
    result
}
