//! Task queue: deferred work items and the FIFO that buffers them.

pub mod task_queue;
pub mod work_item;

pub use task_queue::BackgroundTaskQueue;
pub use work_item::{BackgroundTask, RecurringWork, WorkFuture, WorkItem};
