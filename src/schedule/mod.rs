//! Recurring schedules: cron rules that feed the task queue.

pub mod cron_expr;
pub mod entry;
pub mod processor;
pub mod registry;

pub use cron_expr::CronExpression;
pub use entry::{ScheduleEntry, ScheduledTask};
pub use processor::ScheduledProcessor;
pub use registry::{DueWork, ScheduleRegistry, ScheduleSnapshot};
