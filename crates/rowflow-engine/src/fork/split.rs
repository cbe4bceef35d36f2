use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use rowflow_types::{PipelineError, Row, RowBatch, TableHeader, Value};
use tokio::task::JoinHandle;

use super::{abandon, branch_input};
use crate::channel::RowChannel;
use crate::context::Context;
use crate::source::{compose, drain_channel, join_failure, BatchStream, Source, Transformer};
use crate::transforms::Normalize;

/// Partition the stream into contiguous groups of equal key values and run
/// each group through a fresh instance of `branch`, one group at a time.
///
/// A row opens a new group when its key differs from the key of the first
/// row of the currently open group.
#[derive(Clone)]
pub struct SplitIn {
    keys: Vec<String>,
    branch: Vec<Arc<dyn Transformer>>,
    buffer: Option<usize>,
}

impl SplitIn {
    #[must_use]
    pub fn new<S: Into<String>>(
        keys: impl IntoIterator<Item = S>,
        branch: Vec<Arc<dyn Transformer>>,
    ) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            branch,
            buffer: None,
        }
    }

    #[must_use]
    pub fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

impl Transformer for SplitIn {
    fn name(&self) -> &str {
        "split_in"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        if self.keys.is_empty() {
            return Err(PipelineError::config(
                "NO_SPLIT_KEYS",
                "split_in needs at least one key column",
            ));
        }
        let (header, context, upstream) = source.into_parts();
        let buffer = self.buffer.unwrap_or_else(|| context.channel_buffer());
        let normalized = Arc::new(header.normalize());
        let key_positions = self
            .keys
            .iter()
            .map(|key| normalized.position_of(key))
            .collect::<Result<Vec<_>, _>>()?;

        let mut stages = self.branch.clone();
        stages.push(Arc::new(Normalize));
        // Instances are header-pure, so an empty template fixes the output header.
        let template = compose(
            Source::new(
                normalized.clone(),
                context.child("split-template"),
                stream::empty().boxed(),
            ),
            &stages,
        )?;

        let out = RowChannel::new(buffer);
        let splitter = Splitter {
            upstream,
            header,
            normalized,
            key_positions,
            stages,
            context: context.clone(),
            out: out.clone(),
            buffer,
        };
        Ok(Source::new(
            template.shared_header(),
            context,
            drain_channel(out, "split-in", splitter.run()),
        ))
    }
}

struct Splitter {
    upstream: BatchStream,
    header: Arc<TableHeader>,
    normalized: Arc<TableHeader>,
    key_positions: Vec<usize>,
    stages: Vec<Arc<dyn Transformer>>,
    context: Context,
    out: RowChannel,
    buffer: usize,
}

/// The single open key group: its head key, its input channel, and the task
/// relaying its pipeline instance into the output channel.
struct Group {
    index: u64,
    head: Vec<Value>,
    input: RowChannel,
    rows: u64,
    task: Option<JoinHandle<Result<bool, PipelineError>>>,
}

impl Drop for Group {
    fn drop(&mut self) {
        self.input.close();
    }
}

impl Group {
    async fn send(&mut self, rows: Vec<Row>) {
        if rows.is_empty() {
            return;
        }
        self.rows += rows.len() as u64;
        // A failed put means the instance stopped reading; its rows are dropped.
        let _ = self.input.put(RowBatch::new(rows)).await;
    }

    /// Drain and close the group. Returns whether downstream still reads.
    async fn finish(mut self) -> Result<bool, PipelineError> {
        let _ = self.input.flush(None).await;
        self.input.close();
        let open = match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| join_failure("split-in group", &e))??,
            None => true,
        };
        tracing::debug!(group = self.index, rows = self.rows, "Split-in group closed");
        Ok(open)
    }
}

impl Splitter {
    fn key_of(&self, row: &Row) -> Vec<Value> {
        self.key_positions
            .iter()
            .map(|&p| row.get(p).cloned().unwrap_or_default())
            .collect()
    }

    fn open_group(&self, index: u64, head: Vec<Value>) -> Result<Group, PipelineError> {
        let input = RowChannel::new(self.buffer);
        let instance = compose(
            branch_input(
                self.normalized.clone(),
                self.context.child(format!("group-{index}")),
                &input,
            ),
            &self.stages,
        )?;
        let task = tokio::spawn(run_instance(
            instance.into_parts().2,
            input.clone(),
            self.out.clone(),
        ));
        tracing::debug!(group = index, "Split-in group opened");
        Ok(Group {
            index,
            head,
            input,
            rows: 0,
            task: Some(task),
        })
    }

    async fn run(mut self) -> Result<(), PipelineError> {
        let mut group: Option<Group> = None;
        let mut groups = 0u64;

        while let Some(batch) = self.upstream.next().await {
            if self.out.is_closed() {
                break;
            }
            let rows = self.header.normalize_batch(batch?).into_rows();
            let mut pending: Vec<Row> = Vec::new();
            for row in rows {
                let key = self.key_of(&row);
                if group.as_ref().is_some_and(|g| g.head == key) {
                    pending.push(row);
                    continue;
                }
                if let Some(mut open) = group.take() {
                    open.send(std::mem::take(&mut pending)).await;
                    if !open.finish().await? {
                        return Ok(());
                    }
                }
                groups += 1;
                group = Some(self.open_group(groups, key)?);
                pending.push(row);
            }
            if let Some(open) = group.as_mut() {
                open.send(pending).await;
            }
        }

        if let Some(open) = group {
            open.finish().await?;
        }
        tracing::debug!(groups, "Split-in finished");
        Ok(())
    }
}

/// Relay one instance's output. Returns `false` once downstream has closed.
async fn run_instance(
    mut output: BatchStream,
    input: RowChannel,
    out: RowChannel,
) -> Result<bool, PipelineError> {
    let result = loop {
        match output.next().await {
            Some(Ok(batch)) => {
                if out.put(batch).await.is_err() {
                    break Ok(false);
                }
            }
            Some(Err(err)) => break Err(err),
            None => break Ok(true),
        }
    };
    abandon(&input).await;
    result
}
