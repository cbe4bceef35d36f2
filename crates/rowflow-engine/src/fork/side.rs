use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use rowflow_types::{PipelineError, RowBatch, TableHeader};
use tokio::task::JoinHandle;

use super::{abandon, branch_input};
use crate::channel::RowChannel;
use crate::source::{compose, join_failure, BatchStream, Source, Transformer};

/// Side branch fed a normalized copy of every batch. Its output is
/// discarded; the main stream passes through unchanged.
#[derive(Clone)]
pub struct Fork {
    branch: Vec<Arc<dyn Transformer>>,
    buffer: Option<usize>,
}

impl Fork {
    #[must_use]
    pub fn new(branch: Vec<Arc<dyn Transformer>>) -> Self {
        Self {
            branch,
            buffer: None,
        }
    }

    /// Channel buffer length between the main stream and the branch.
    #[must_use]
    pub fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

impl Transformer for Fork {
    fn name(&self) -> &str {
        "fork"
    }

    fn apply(&self, source: Source) -> Result<Source, PipelineError> {
        let (header, context, upstream) = source.into_parts();
        let buffer = self.buffer.unwrap_or_else(|| context.channel_buffer());
        let channel = RowChannel::new(buffer);
        let branch = compose(
            branch_input(Arc::new(header.normalize()), context.child("fork"), &channel),
            &self.branch,
        )?;
        let state = ForkState {
            upstream,
            header: header.clone(),
            channel,
            branch: Branch::Pending(branch.into_parts().2),
            forwarding: true,
            done: false,
        };
        Ok(Source::new(
            header,
            context,
            stream::unfold(state, ForkState::step).boxed(),
        ))
    }
}

enum Branch {
    Pending(BatchStream),
    Running(JoinHandle<Result<(), PipelineError>>),
    Finished,
}

struct ForkState {
    upstream: BatchStream,
    header: Arc<TableHeader>,
    channel: RowChannel,
    branch: Branch,
    forwarding: bool,
    done: bool,
}

impl Drop for ForkState {
    fn drop(&mut self) {
        self.channel.close();
    }
}

impl ForkState {
    async fn step(mut self) -> Option<(Result<RowBatch, PipelineError>, Self)> {
        if self.done {
            return None;
        }
        self.branch = match std::mem::replace(&mut self.branch, Branch::Finished) {
            Branch::Pending(output) => {
                Branch::Running(tokio::spawn(drive_branch(output, self.channel.clone())))
            }
            other => other,
        };

        match self.upstream.next().await {
            Some(Ok(batch)) => {
                if self.forwarding {
                    let copy = self.header.normalize_batch(batch.clone());
                    if self.channel.put(copy).await.is_err() {
                        tracing::debug!("Fork branch stopped consuming; forwarding disabled");
                        self.forwarding = false;
                    }
                }
                Some((Ok(batch), self))
            }
            Some(Err(err)) => {
                self.done = true;
                self.channel.close();
                Some((Err(err), self))
            }
            None => {
                self.done = true;
                // The branch discards its backlog before closing, so this
                // resolves even when it stopped early.
                let _ = self.channel.flush(None).await;
                self.channel.close();
                let Branch::Running(handle) = std::mem::replace(&mut self.branch, Branch::Finished)
                else {
                    return None;
                };
                match handle.await {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some((Err(err), self)),
                    Err(join) => Some((Err(join_failure("fork branch", &join)), self)),
                }
            }
        }
    }
}

async fn drive_branch(mut output: BatchStream, input: RowChannel) -> Result<(), PipelineError> {
    tracing::debug!("Fork branch started");
    let mut batches = 0u64;
    let result = loop {
        match output.next().await {
            Some(Ok(_)) => batches += 1,
            Some(Err(err)) => break Err(err),
            None => break Ok(()),
        }
    };
    abandon(&input).await;
    tracing::debug!(batches, ok = result.is_ok(), "Fork branch finished");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::context::Context;
    use crate::transforms::{MapRows, RemoveColumns};
    use rowflow_types::{row, Row, Value};

    fn source() -> Source {
        Source::from_batches(
            TableHeader::from_names(&["a", "b"]),
            Context::root(),
            vec![
                RowBatch::new(vec![row![1, 2]]),
                RowBatch::new(vec![row![3, 4]]),
            ],
        )
    }

    fn recorder(seen: Arc<Mutex<Vec<Row>>>) -> Arc<dyn Transformer> {
        Arc::new(MapRows::new("record", move |_, row| {
            seen.lock().unwrap().push(row.clone());
            Ok(())
        }))
    }

    #[tokio::test]
    async fn main_stream_passes_through_and_branch_sees_every_batch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let fork = Fork::new(vec![recorder(seen.clone())]);
        let out = fork.apply(source()).unwrap();
        assert_eq!(out.header().names(), vec!["a", "b"]);
        let rows = out.collect_rows().await.unwrap();
        assert_eq!(rows, vec![row![1, 2], row![3, 4]]);
        assert_eq!(*seen.lock().unwrap(), vec![row![1, 2], row![3, 4]]);
    }

    #[tokio::test]
    async fn branch_receives_normalized_copy() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stages: Vec<Arc<dyn Transformer>> = vec![
            Arc::new(RemoveColumns::new(["a"])),
            Arc::new(Fork::new(vec![recorder(seen.clone())])),
        ];
        let out = compose(source(), &stages).unwrap();
        // The main stream is still soft-deleted: rows keep both cells.
        assert_eq!(out.collect_rows().await.unwrap()[0], row![1, 2]);
        assert_eq!(seen.lock().unwrap()[0], row![2]);
    }

    #[tokio::test]
    async fn branch_error_surfaces_after_main_stream() {
        let failing: Arc<dyn Transformer> = Arc::new(MapRows::new("fail", |_, row| {
            if row[0] == Value::Int(3) {
                return Err(PipelineError::config("BRANCH", "branch failed"));
            }
            Ok(())
        }));
        let mut out = Fork::new(vec![failing]).apply(source()).unwrap();
        assert!(out.next_batch().await.unwrap().is_ok());
        assert!(out.next_batch().await.unwrap().is_ok());
        let err = out.next_batch().await.unwrap().unwrap_err();
        assert_eq!(err.code(), "BRANCH");
        assert!(out.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn early_stopping_branch_does_not_stall_main_stream() {
        use super::super::test_support::FirstBatchOnly;
        use std::time::Duration;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let batches = (0..20).map(|i| RowBatch::new(vec![row![i, i]])).collect();
        let source = Source::from_batches(TableHeader::from_names(&["a", "b"]), Context::root(), batches);
        let out = Fork::new(vec![Arc::new(FirstBatchOnly), recorder(seen.clone())])
            .apply(source)
            .unwrap();

        let rows = tokio::time::timeout(Duration::from_secs(5), out.collect_rows())
            .await
            .expect("main stream must not wait on a stopped branch")
            .unwrap();
        assert_eq!(rows.len(), 20);
        assert_eq!(*seen.lock().unwrap(), vec![row![0, 0]]);
    }

    #[tokio::test]
    async fn dropping_main_stream_releases_branch() {
        use super::super::test_support::{endless, SignalOnDrop};
        use std::time::Duration;
        use tokio::sync::oneshot;

        let (branch_tx, branch_rx) = oneshot::channel();
        let (upstream_tx, _upstream_rx) = oneshot::channel();
        let mut out = Fork::new(vec![SignalOnDrop::new(branch_tx)])
            .apply(endless(upstream_tx))
            .unwrap();
        assert!(out.next_batch().await.unwrap().is_ok());
        assert!(out.next_batch().await.unwrap().is_ok());
        drop(out);

        tokio::time::timeout(Duration::from_secs(5), branch_rx)
            .await
            .expect("branch task must end once the main stream is dropped")
            .unwrap();
    }
}
