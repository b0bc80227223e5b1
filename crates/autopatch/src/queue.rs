//! Connection queue
//!
//! Unbounded FIFO between whoever produces intents (refresh passes, event
//! callbacks) and the applier. A reserved item marks the end of a session.
//! Sending never blocks, so it is safe from a server notification thread.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::graph::ConnectionIntent;

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueueItem {
    Connect(ConnectionIntent),
    SessionEnded,
}

/// Outcome of one bounded wait on the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued {
    Intent(ConnectionIntent),
    /// Sentinel reached, or every sender is gone.
    SessionEnded,
    Timeout,
}

pub fn connection_queue() -> (IntentSender, IntentReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IntentSender { tx }, IntentReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct IntentSender {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl IntentSender {
    /// Enqueue one intent. Returns false if the consumer is gone.
    pub fn push(&self, intent: ConnectionIntent) -> bool {
        trace!("Queued {}", intent);
        self.tx.send(QueueItem::Connect(intent)).is_ok()
    }

    /// Enqueue intents in order, returning how many were accepted.
    pub fn push_all(&self, intents: impl IntoIterator<Item = ConnectionIntent>) -> usize {
        intents
            .into_iter()
            .map(|intent| self.push(intent))
            .take_while(|accepted| *accepted)
            .count()
    }

    /// Tell the consumer the session is over.
    pub fn end_session(&self) -> bool {
        self.tx.send(QueueItem::SessionEnded).is_ok()
    }
}

#[derive(Debug)]
pub struct IntentReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
}

impl IntentReceiver {
    /// Wait up to `timeout` for the next item. Cancel safe.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Dequeued {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(QueueItem::Connect(intent))) => Dequeued::Intent(intent),
            Ok(Some(QueueItem::SessionEnded)) | Ok(None) => Dequeued::SessionEnded,
            Err(_) => Dequeued::Timeout,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
