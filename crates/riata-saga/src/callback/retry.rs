//! Asynchronous retry of failed compensation sends.
//!
//! [`PushBackCallback`] wraps another callback with a bounded retry queue.
//! A failed send is acknowledged to the caller and pushed onto the queue; a
//! background worker waits out a fixed delay, tries the send again, and on
//! repeated failure pushes the command back to the tail so one unreachable
//! service does not starve the rest of the queue.
//!
//! The worker holds only a weak handle to the queue. When the last
//! `PushBackCallback` clone is dropped the channel closes and the worker
//! drains out on its own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError, WeakSender};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::SagaCallback;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::metrics::SagaMetrics;

/// Retry decorator over another callback.
pub struct PushBackCallback {
    inner: Arc<dyn SagaCallback>,
    queue: mpsc::Sender<Command>,
    capacity: usize,
    metrics: SagaMetrics,
}

impl PushBackCallback {
    /// Wraps `inner` with a retry queue of `capacity` commands, spawning
    /// the background retry worker on the current runtime.
    ///
    /// `retry_delay` is waited out before every retry attempt.
    #[must_use]
    pub fn new(inner: Arc<dyn SagaCallback>, capacity: usize, retry_delay: Duration) -> Self {
        let (queue, rx) = mpsc::channel(capacity);
        tokio::spawn(retry_worker(
            Arc::clone(&inner),
            rx,
            queue.downgrade(),
            retry_delay,
        ));
        Self {
            inner,
            queue,
            capacity,
            metrics: SagaMetrics::new(),
        }
    }

    /// Commands currently waiting in the retry queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.capacity - self.queue.capacity()
    }
}

#[async_trait]
impl SagaCallback for PushBackCallback {
    /// Sends `command`, falling back to the retry queue on failure.
    ///
    /// A failed send is not an error to the caller: the command is queued
    /// and will be retried until a send goes through. The only error path
    /// is [`Error::RetryQueueClosed`] during shutdown.
    async fn compensate(&self, command: &Command) -> Result<()> {
        match self.inner.compensate(command).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    command = %command.key(),
                    service_name = %command.service_name,
                    error = %err,
                    "compensation send failed, queueing for retry"
                );
                self.metrics.record_compensation_retry();
                self.queue
                    .send(command.clone())
                    .await
                    .map_err(|_| Error::RetryQueueClosed)?;
                self.metrics.set_retry_queue_depth(self.queue_depth());
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for PushBackCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushBackCallback")
            .field("capacity", &self.capacity)
            .field("queue_depth", &self.queue_depth())
            .finish()
    }
}

/// Drains the retry queue until every sender is gone.
async fn retry_worker(
    inner: Arc<dyn SagaCallback>,
    mut rx: mpsc::Receiver<Command>,
    queue: WeakSender<Command>,
    retry_delay: Duration,
) {
    let metrics = SagaMetrics::new();
    while let Some(mut current) = rx.recv().await {
        loop {
            sleep(retry_delay).await;
            match inner.compensate(&current).await {
                Ok(()) => break,
                Err(err) => {
                    warn!(
                        command = %current.key(),
                        service_name = %current.service_name,
                        error = %err,
                        "compensation retry failed"
                    );
                    metrics.record_compensation_retry();
                }
            }

            // Push back to the tail so other queued commands get a turn.
            // A full queue keeps the command here and retries inline.
            let Some(tx) = queue.upgrade() else {
                debug!(command = %current.key(), "retry queue closed, dropping command");
                return;
            };
            match tx.try_send(current) {
                Ok(()) => break,
                Err(TrySendError::Full(returned) | TrySendError::Closed(returned)) => {
                    current = returned;
                }
            }
        }
    }
    debug!("compensation retry worker stopped");
}
