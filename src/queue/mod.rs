// src/queue/mod.rs
//! Batch Queue (C5, §4.5): a single-consumer queue that coalesces
//! individually-submitted items into size-or-time-bounded batches, handed
//! to a caller-supplied processor. Grounded on the original Python
//! `_batch_processor` (`concurrent_memory_manager.py`): collect until
//! `batch_size` or `batch_timeout` elapses, whichever comes first, then
//! drain. The teacher's `TaskManager` (`tasks/mod.rs`) is the grounding
//! for spawning it as a `JoinHandle` background task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::error;

/// Implemented by whatever the queue is coalescing for — e.g. the
/// repair-write retry path in the Dual-Write Store (C7 §4.7).
#[async_trait::async_trait]
pub trait BatchProcessor<T: Send + 'static>: Send + Sync {
    async fn process_batch(&self, batch: Vec<T>);
}

pub struct BatchQueue<T: Send + 'static> {
    sender: mpsc::Sender<T>,
    handle: JoinHandle<()>,
    capacity: usize,
}

impl<T: Send + 'static> BatchQueue<T> {
    /// Spawns the consumer task. `capacity` bounds the channel so a
    /// producer racing ahead of the consumer applies backpressure rather
    /// than growing without limit (§5).
    pub fn spawn(
        capacity: usize,
        batch_size: usize,
        batch_timeout: Duration,
        processor: Arc<dyn BatchProcessor<T>>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(Self::run(receiver, batch_size.max(1), batch_timeout, processor));
        Self {
            sender,
            handle,
            capacity: capacity.max(1),
        }
    }

    /// Approximate backlog, sampled by the Perf Monitor (C11): how many
    /// submitted items are waiting for a slot the channel hasn't freed yet.
    pub fn queue_depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    /// Enqueues `item`. Blocks only long enough to apply backpressure —
    /// never indefinitely, since the consumer always drains.
    pub async fn submit(&self, item: T) -> Result<(), mpsc::error::SendError<T>> {
        self.sender.send(item).await
    }

    pub fn try_submit(&self, item: T) -> Result<(), mpsc::error::TrySendError<T>> {
        self.sender.try_send(item)
    }

    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            error!(error = %e, "batch queue consumer task panicked");
        }
    }

    async fn run(
        mut receiver: mpsc::Receiver<T>,
        batch_size: usize,
        batch_timeout: Duration,
        processor: Arc<dyn BatchProcessor<T>>,
    ) {
        loop {
            // Block for the first item of the batch with no deadline; the
            // coalescing window only starts once there's something to
            // coalesce (§4.5's "elapsed since the first item").
            let first = match receiver.recv().await {
                Some(item) => item,
                None => return, // sender dropped, nothing queued
            };
            let mut batch = Vec::with_capacity(batch_size);
            batch.push(first);
            let deadline = Instant::now() + batch_timeout;

            while batch.len() < batch_size {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, receiver.recv()).await {
                    Ok(Some(item)) => batch.push(item),
                    Ok(None) => {
                        // Sender dropped: flush whatever we have and stop.
                        processor.process_batch(batch).await;
                        return;
                    }
                    Err(_) => break, // timed out waiting for the next item
                }
            }

            let len = batch.len();
            processor.process_batch(batch).await;
            if len == batch_size {
                // Immediately check for more work rather than idling a
                // full timeout when the producer is running hot.
                continue;
            }
        }
    }
}
