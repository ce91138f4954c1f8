//! Schedule entries: a cron rule bound to recurring work.

use tokio_util::sync::CancellationToken;

use super::cron_expr::CronExpression;
use crate::error::ScheduleError;
use crate::queue::{RecurringWork, WorkItem};

/// An unvalidated registration request.
///
/// Every field is optional so that incomplete requests can be reported as
/// validation errors instead of being impossible to express.
#[derive(Debug, Default, Clone)]
pub struct ScheduledTask {
    pub name: Option<String>,
    pub cron: Option<String>,
    pub work: Option<RecurringWork>,
    /// Retires this schedule without touching the worker. A fresh token is
    /// used when absent.
    pub cancel: Option<CancellationToken>,
}

impl ScheduledTask {
    pub fn new(cron: impl Into<String>, work: RecurringWork) -> Self {
        Self {
            cron: Some(cron.into()),
            work: Some(work),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A validated, immutable schedule entry.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    name: Option<String>,
    expression: CronExpression,
    work: RecurringWork,
    cancel: CancellationToken,
}

impl ScheduleEntry {
    /// Check a registration request. Fails on a missing, empty or unparseable
    /// expression and on missing work.
    pub fn validate(task: ScheduledTask) -> Result<Self, ScheduleError> {
        let cron = task.cron.ok_or(ScheduleError::MissingExpression)?;
        if cron.trim().is_empty() {
            return Err(ScheduleError::EmptyExpression);
        }
        let expression = CronExpression::parse(&cron)?;
        let work = task.work.ok_or(ScheduleError::MissingWork)?;

        Ok(Self {
            name: task.name.filter(|n| !n.trim().is_empty()),
            expression,
            work,
            cancel: task.cancel.unwrap_or_default(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for logs: the entry name, or its expression when unnamed.
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or_else(|| self.expression.source())
    }

    pub fn expression(&self) -> &CronExpression {
        &self.expression
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fresh work item for one occurrence.
    pub fn instantiate(&self) -> WorkItem {
        self.work.instantiate(Some(self.display_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> RecurringWork {
        RecurringWork::new(|_cancel| async { Ok(()) })
    }

    #[test]
    fn missing_expression() {
        let task = ScheduledTask {
            work: Some(noop()),
            ..Default::default()
        };
        assert!(matches!(
            ScheduleEntry::validate(task),
            Err(ScheduleError::MissingExpression)
        ));
    }

    #[test]
    fn empty_expression() {
        assert!(matches!(
            ScheduleEntry::validate(ScheduledTask::new("", noop())),
            Err(ScheduleError::EmptyExpression)
        ));
    }

    #[test]
    fn unparseable_expression() {
        assert!(matches!(
            ScheduleEntry::validate(ScheduledTask::new("every tuesday", noop())),
            Err(ScheduleError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn missing_work() {
        let task = ScheduledTask {
            cron: Some("0 9 * * *".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            ScheduleEntry::validate(task),
            Err(ScheduleError::MissingWork)
        ));
    }

    #[test]
    fn valid_entry_labels_its_items() {
        let entry =
            ScheduleEntry::validate(ScheduledTask::new("0 9 * * *", noop()).with_name("digest"))
                .unwrap();
        assert_eq!(entry.display_name(), "digest");
        assert_eq!(entry.instantiate().label(), Some("digest"));

        let unnamed = ScheduleEntry::validate(ScheduledTask::new("0 9 * * *", noop())).unwrap();
        assert_eq!(unnamed.display_name(), "0 9 * * *");
    }

    #[test]
    fn cancellation_is_per_entry() {
        let cancel = CancellationToken::new();
        let entry = ScheduleEntry::validate(
            ScheduledTask::new("* * * * *", noop()).with_cancellation(cancel.clone()),
        )
        .unwrap();
        assert!(!entry.is_cancelled());
        cancel.cancel();
        assert!(entry.is_cancelled());
    }
}
