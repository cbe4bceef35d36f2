//! Closable, optionally-buffered FIFO handoff for row batches.
//!
//! [`RowChannel`] connects concurrently scheduled branches. With the default
//! capacity of 0 every `put` is a synchronous handoff: the producer waits
//! until a consumer takes the batch, so a slow consumer stalls its producer.
//!
//! Closing is the only stop signal. `close()` fails every blocked and future
//! `put`, and releases every blocked `take` with `None`. Batches already in
//! the buffer stay takeable; call [`RowChannel::flush`] before closing when
//! their delivery matters.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use rowflow_types::{ChannelError, RowBatch};
use tokio::sync::{oneshot, Notify};

struct State {
    buffer: VecDeque<RowBatch>,
    producers: VecDeque<(RowBatch, oneshot::Sender<bool>)>,
    consumers: VecDeque<oneshot::Sender<Option<RowBatch>>>,
    closed: bool,
}

struct Shared {
    capacity: usize,
    state: Mutex<State>,
    changed: Notify,
}

/// Cooperative row-batch channel. Clones share the same queue.
#[derive(Clone)]
pub struct RowChannel {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RowChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RowChannel")
            .field("capacity", &self.shared.capacity)
            .field("buffered", &state.buffer.len())
            .field("blocked_producers", &state.producers.len())
            .field("blocked_consumers", &state.consumers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl Default for RowChannel {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RowChannel {
    /// Create a channel buffering up to `capacity` batches (0 = synchronous handoff).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity,
                state: Mutex::new(State {
                    buffer: VecDeque::with_capacity(capacity),
                    producers: VecDeque::new(),
                    consumers: VecDeque::new(),
                    closed: false,
                }),
                changed: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of batches currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Hand a batch to the channel.
    ///
    /// Completes immediately when a consumer is already waiting or buffer
    /// space is free; otherwise waits for a slot.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the channel is closed before or
    /// while waiting. A failed put means "stop producing".
    pub async fn put(&self, batch: RowBatch) -> Result<(), ChannelError> {
        let ack = {
            let mut state = self.lock();
            if state.closed {
                return Err(ChannelError::Closed);
            }
            let mut batch = batch;
            while let Some(consumer) = state.consumers.pop_front() {
                match consumer.send(Some(batch)) {
                    Ok(()) => {
                        drop(state);
                        self.shared.changed.notify_waiters();
                        return Ok(());
                    }
                    // Consumer gave up waiting; try the next one.
                    Err(returned) => batch = returned.unwrap_or_default(),
                }
            }
            if state.buffer.len() < self.shared.capacity {
                state.buffer.push_back(batch);
                drop(state);
                self.shared.changed.notify_waiters();
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.producers.push_back((batch, tx));
            rx
        };
        match ack.await {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(ChannelError::Closed),
        }
    }

    /// Take the next batch, or `None` once the channel is closed and drained.
    pub async fn take(&self) -> Option<RowBatch> {
        let waiter = {
            let mut state = self.lock();
            if let Some(batch) = state.buffer.pop_front() {
                // Refill the freed slot from the first producer still waiting.
                while let Some((pending, ack)) = state.producers.pop_front() {
                    if ack.send(true).is_ok() {
                        state.buffer.push_back(pending);
                        break;
                    }
                }
                drop(state);
                self.shared.changed.notify_waiters();
                return Some(batch);
            }
            while let Some((pending, ack)) = state.producers.pop_front() {
                if ack.send(true).is_ok() {
                    drop(state);
                    self.shared.changed.notify_waiters();
                    return Some(pending);
                }
            }
            if state.closed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            state.consumers.push_back(tx);
            rx
        };
        waiter.await.ok().flatten()
    }

    /// Close the channel. Idempotent.
    ///
    /// Blocked consumers receive `None`; blocked producers fail. Buffered
    /// batches are not discarded.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let consumers = std::mem::take(&mut state.consumers);
        let producers = std::mem::take(&mut state.producers);
        if !producers.is_empty() || !state.buffer.is_empty() {
            tracing::debug!(
                blocked_producers = producers.len(),
                buffered = state.buffer.len(),
                "Closing row channel with undelivered batches"
            );
        }
        drop(state);
        for consumer in consumers {
            let _ = consumer.send(None);
        }
        for (_, ack) in producers {
            let _ = ack.send(false);
        }
        self.shared.changed.notify_waiters();
    }

    /// Wait until the buffer and the producer queue are both empty.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::FlushTimeout`] if `timeout` elapses first.
    pub async fn flush(&self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let drained = async {
            loop {
                let notified = self.shared.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                {
                    let state = self.lock();
                    if state.buffer.is_empty() && state.producers.is_empty() {
                        return;
                    }
                }
                notified.await;
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, drained)
                .await
                .map_err(|_| ChannelError::FlushTimeout(limit)),
            None => {
                drained.await;
                Ok(())
            }
        }
    }

    /// Stream of batches that ends at the closed sentinel.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, RowBatch> {
        stream::unfold(self, |channel| async move {
            channel.take().await.map(|batch| (batch, channel))
        })
        .boxed()
    }
}
