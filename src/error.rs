//! Error types for assistant-tasks.

/// Top-level error type for the background task subsystem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Schedule registration errors.
///
/// Raised synchronously by `add_scheduled_task`; a failed registration never
/// appends anything to the registry.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Scheduled task has no cron expression")]
    MissingExpression,

    #[error("Scheduled task has an empty cron expression")]
    EmptyExpression,

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Scheduled task has no work item")]
    MissingWork,

    #[error("Schedule registry is no longer running")]
    RegistryClosed,
}

/// Task queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("Queue is closed")]
    Closed,

    #[error("Queue operation cancelled")]
    Cancelled,
}

/// Hosted service lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Service {name} was already started")]
    AlreadyStarted { name: String },

    #[error("Service {name} loop failed to join: {reason}")]
    Join { name: String, reason: String },
}

/// Error returned by a work item.
///
/// The worker logs and publishes these; it never propagates or retries them.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("{0}")]
    Failed(String),

    #[error("Work item observed cancellation")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkError {
    /// Convenience constructor for a plain failure message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn register(expression: &str) -> Result<()> {
        if expression.is_empty() {
            return Err(ScheduleError::EmptyExpression.into());
        }
        let queued: std::result::Result<(), QueueError> = Err(QueueError::Full { capacity: 4 });
        queued?;
        Ok(())
    }

    #[test]
    fn subsystem_errors_convert_into_top_level() {
        let err = register("").unwrap_err();
        assert!(matches!(err, Error::Schedule(ScheduleError::EmptyExpression)));
        assert_eq!(
            err.to_string(),
            "Schedule error: Scheduled task has an empty cron expression"
        );

        let err = register("* * * * *").unwrap_err();
        assert!(matches!(err, Error::Queue(QueueError::Full { capacity: 4 })));
    }

    #[test]
    fn work_error_wraps_anyhow() {
        let err: WorkError = anyhow::anyhow!("mailbox unreachable").into();
        assert_eq!(err.to_string(), "mailbox unreachable");
        assert_eq!(WorkError::failed("boom").to_string(), "boom");
    }
}
