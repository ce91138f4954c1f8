//! Background task queue: multi-producer, single-consumer FIFO of work items.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::work_item::WorkItem;
use crate::error::QueueError;

enum QueueSender {
    Unbounded(mpsc::UnboundedSender<WorkItem>),
    Bounded(mpsc::Sender<WorkItem>),
}

enum QueueReceiver {
    Unbounded(mpsc::UnboundedReceiver<WorkItem>),
    Bounded(mpsc::Receiver<WorkItem>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<WorkItem> {
        match self {
            Self::Unbounded(rx) => rx.recv().await,
            Self::Bounded(rx) => rx.recv().await,
        }
    }
}

/// In-process queue of deferred work.
///
/// Any number of tasks may enqueue; dequeuing is serialized so that each item
/// is delivered to exactly one consumer.
pub struct BackgroundTaskQueue {
    tx: QueueSender,
    rx: Mutex<QueueReceiver>,
    capacity: Option<usize>,
    pending: AtomicUsize,
}

impl BackgroundTaskQueue {
    /// Create an unbounded queue.
    pub fn unbounded() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx: QueueSender::Unbounded(tx),
            rx: Mutex::new(QueueReceiver::Unbounded(rx)),
            capacity: None,
            pending: AtomicUsize::new(0),
        })
    }

    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn bounded(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Arc::new(Self {
            tx: QueueSender::Bounded(tx),
            rx: Mutex::new(QueueReceiver::Bounded(rx)),
            capacity: Some(capacity),
            pending: AtomicUsize::new(0),
        })
    }

    /// Create a queue from an optional capacity (`None` = unbounded).
    pub fn with_capacity(capacity: Option<usize>) -> Arc<Self> {
        match capacity {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    /// Enqueue without waiting. Always succeeds on an unbounded queue.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        let id = item.id();
        // Count before sending so a racing dequeue never underflows.
        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = match &self.tx {
            QueueSender::Unbounded(tx) => tx.send(item).map_err(|_| QueueError::Closed),
            QueueSender::Bounded(tx) => tx.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full {
                    capacity: self.capacity.unwrap_or_default(),
                },
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            }),
        };

        if let Err(e) = sent {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(item = %id, error = %e, "Rejected work item");
            return Err(e);
        }
        debug!(item = %id, "Work item queued");
        Ok(())
    }

    /// Enqueue, waiting for space on a bounded queue until `cancel` fires.
    pub async fn enqueue_wait(
        &self,
        item: WorkItem,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        let tx = match &self.tx {
            QueueSender::Unbounded(_) => return self.enqueue(item),
            QueueSender::Bounded(tx) => tx,
        };

        let id = item.id();
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            permit = tx.reserve() => permit.map_err(|_| QueueError::Closed)?,
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        permit.send(item);
        debug!(item = %id, "Work item queued after waiting for space");
        Ok(())
    }

    /// Wait for the next item in FIFO order, or fail with
    /// [`QueueError::Cancelled`] once `cancel` fires.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Result<WorkItem, QueueError> {
        let next = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };

        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            item = next => item.ok_or(QueueError::Closed)?,
        };
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Ok(item)
    }

    /// Number of items waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
