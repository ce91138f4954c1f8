//! Assistant Tasks: background work queue, hosted worker and cron scheduler.
//!
//! Scheduled entries are swept into a FIFO queue that a single hosted worker
//! drains:
//!
//! ```text
//! ScheduleRegistry ──sweep──▶ BackgroundTaskQueue ──dequeue──▶ QueuedHostedService
//! ```

pub mod config;
pub mod error;
pub mod queue;
pub mod schedule;
pub mod worker;

pub use config::TaskConfig;
pub use error::{Error, Result, WorkError};
pub use queue::{BackgroundTask, BackgroundTaskQueue, RecurringWork, WorkItem};
pub use schedule::{ScheduleRegistry, ScheduledProcessor, ScheduledTask};
pub use worker::{HostedService, QueuedHostedService, ServiceHost, WorkerState};
