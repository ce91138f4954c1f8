//! Queued hosted service: drains the task queue one item at a time.
//!
//! A failing or panicking item never stops the loop. Every outcome is logged,
//! counted, and published on a broadcast channel so callers can observe
//! failures instead of losing them.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::background::BackgroundLoop;
use super::hosted::HostedService;
use super::state::WorkerState;
use crate::config::TaskConfig;
use crate::error::{QueueError, WorkError, WorkerError};
use crate::queue::{BackgroundTaskQueue, WorkItem};

/// How a single work item ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkOutcome {
    Completed,
    /// The item returned early because the worker was stopping.
    Cancelled,
    Failed { error: String },
    Panicked { message: String },
}

impl WorkOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Panicked { .. })
    }
}

/// Published after every executed item.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerEvent {
    pub item_id: Uuid,
    pub label: Option<String>,
    pub outcome: WorkOutcome,
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub panicked: u64,
}

impl WorkerStats {
    pub fn processed(&self) -> u64 {
        self.completed + self.cancelled + self.failed + self.panicked
    }
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &WorkOutcome) {
        let counter = match outcome {
            WorkOutcome::Completed => &self.completed,
            WorkOutcome::Cancelled => &self.cancelled,
            WorkOutcome::Failed { .. } => &self.failed,
            WorkOutcome::Panicked { .. } => &self.panicked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            completed: self.completed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// The single consumer of a [`BackgroundTaskQueue`].
pub struct QueuedHostedService {
    queue: Arc<BackgroundTaskQueue>,
    background: BackgroundLoop,
    events: broadcast::Sender<WorkerEvent>,
    counters: Arc<Counters>,
}

impl QueuedHostedService {
    pub fn new(queue: Arc<BackgroundTaskQueue>, config: &TaskConfig) -> Self {
        let (events, _rx) = broadcast::channel(config.event_capacity);
        Self {
            queue,
            background: BackgroundLoop::new("queued-worker"),
            events,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Subscribe to per-item outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    pub fn queue(&self) -> &Arc<BackgroundTaskQueue> {
        &self.queue
    }
}

#[async_trait]
impl HostedService for QueuedHostedService {
    fn name(&self) -> &str {
        self.background.name()
    }

    fn state(&self) -> WorkerState {
        self.background.state()
    }

    async fn start(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        let queue = Arc::clone(&self.queue);
        let events = self.events.clone();
        let counters = Arc::clone(&self.counters);
        self.background
            .start(cancel, move |stopping| {
                run_loop(queue, stopping, events, counters)
            })
            .await
    }

    async fn stop(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        self.background.stop(cancel).await
    }
}

async fn run_loop(
    queue: Arc<BackgroundTaskQueue>,
    stopping: CancellationToken,
    events: broadcast::Sender<WorkerEvent>,
    counters: Arc<Counters>,
) {
    info!("Queued worker is running");

    loop {
        let item = match queue.dequeue(&stopping).await {
            Ok(item) => item,
            Err(QueueError::Cancelled) => break,
            Err(e) => {
                error!(error = %e, "Queue unavailable, worker exiting");
                break;
            }
        };

        let item_id = item.id();
        let label = item.label().map(str::to_string);
        let started = Instant::now();

        let outcome = execute(item, &stopping).await;
        let elapsed = started.elapsed();

        match &outcome {
            WorkOutcome::Completed => {
                debug!(item = %item_id, label = ?label, ?elapsed, "Work item completed");
            }
            WorkOutcome::Cancelled => {
                info!(item = %item_id, label = ?label, "Work item cancelled by shutdown");
            }
            WorkOutcome::Failed { error } => {
                error!(item = %item_id, label = ?label, %error, "Work item failed");
            }
            WorkOutcome::Panicked { message } => {
                error!(item = %item_id, label = ?label, %message, "Work item panicked");
            }
        }

        counters.record(&outcome);

        // No subscribers is fine
        let _ = events.send(WorkerEvent {
            item_id,
            label,
            outcome,
            elapsed,
            finished_at: Utc::now(),
        });
    }

    if !queue.is_empty() {
        warn!(pending = queue.len(), "Worker stopped with items still queued");
    }
}

/// Run one item to completion, converting errors and panics into an outcome.
pub async fn execute(item: WorkItem, cancel: &CancellationToken) -> WorkOutcome {
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| item.run(cancel.clone()))) {
        Ok(fut) => fut,
        Err(payload) => {
            return WorkOutcome::Panicked {
                message: panic_message(payload.as_ref()),
            };
        }
    };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => WorkOutcome::Completed,
        Ok(Err(WorkError::Cancelled)) => WorkOutcome::Cancelled,
        Ok(Err(e)) => WorkOutcome::Failed {
            error: e.to_string(),
        },
        Err(payload) => WorkOutcome::Panicked {
            message: panic_message(payload.as_ref()),
        },
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
