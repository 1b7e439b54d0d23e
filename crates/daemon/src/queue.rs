//! FIFO hand-off between request intake and the move engine.
//!
//! Any number of [`QueueSender`] clones feed one [`QueueReceiver`]. The queue
//! lives in memory only; whatever is still queued when the receiver is
//! dropped is lost.

use std::time::Duration;

use link_protocol::LinkResponse;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from the transfer queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The consumer has shut down.
    #[error("transfer queue is closed")]
    Closed,
}

/// Create a connected sender/receiver pair.
pub fn transfer_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producer side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<LinkResponse>,
}

impl QueueSender {
    /// Append a pending work item.
    pub fn enqueue(&self, item: LinkResponse) -> Result<(), QueueError> {
        self.tx.send(item).map_err(|_| QueueError::Closed)
    }

    /// Whether the consumer is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side. There is exactly one.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<LinkResponse>,
}

impl QueueReceiver {
    /// Take every item currently queued, oldest first, without waiting.
    pub fn drain(&mut self) -> Vec<LinkResponse> {
        let mut items = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            items.push(item);
        }
        items
    }

    /// Wait up to `timeout` for the next item.
    ///
    /// Returns `Ok(None)` on timeout and [`QueueError::Closed`] once every
    /// sender is dropped and the queue is empty.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<LinkResponse>, QueueError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }

    /// Number of items waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
