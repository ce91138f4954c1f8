//! Work item types: deferred units of async work.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::WorkError;

/// Boxed future returned by a work item.
pub type WorkFuture = BoxFuture<'static, Result<(), WorkError>>;

type RunOnce = Box<dyn FnOnce(CancellationToken) -> WorkFuture + Send>;
type RunMany = Arc<dyn Fn(CancellationToken) -> WorkFuture + Send + Sync>;

/// A named background task that can be run any number of times.
#[async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Run the task once. Implementations should return early when `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> Result<(), WorkError>;
}

/// A single deferred unit of work, consumed by exactly one execution.
///
/// The id and label exist for diagnostics only; queue ordering is positional.
pub struct WorkItem {
    id: Uuid,
    label: Option<String>,
    run: RunOnce,
}

impl WorkItem {
    /// Wrap an async closure taking the worker's cancellation token.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            label: None,
            run: Box::new(move |cancel| f(cancel).boxed()),
        }
    }

    /// Build a one-shot item from a [`BackgroundTask`].
    pub fn from_task(task: Arc<dyn BackgroundTask>) -> Self {
        let label = task.name().to_string();
        Self::new(move |cancel| async move { task.run(cancel).await }).with_label(label)
    }

    /// Attach a label shown in logs and worker events.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Consume the item and produce its future.
    pub fn run(self, cancel: CancellationToken) -> WorkFuture {
        (self.run)(cancel)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A work factory for recurring schedules: each occurrence gets a fresh [`WorkItem`].
#[derive(Clone)]
pub struct RecurringWork {
    run: RunMany,
}

impl RecurringWork {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        Self {
            run: Arc::new(move |cancel| f(cancel).boxed()),
        }
    }

    pub fn from_task(task: Arc<dyn BackgroundTask>) -> Self {
        Self::new(move |cancel| {
            let task = Arc::clone(&task);
            async move { task.run(cancel).await }
        })
    }

    /// Produce the work item for one occurrence.
    pub fn instantiate(&self, label: Option<&str>) -> WorkItem {
        let run = Arc::clone(&self.run);
        let item = WorkItem::new(move |cancel| run(cancel));
        match label {
            Some(label) => item.with_label(label),
            None => item,
        }
    }
}

impl fmt::Debug for RecurringWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurringWork").finish_non_exhaustive()
    }
}
