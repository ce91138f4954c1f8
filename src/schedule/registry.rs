//! Schedule registry: a single task owns every entry.
//!
//! Mutations and reads are messages to that task, so the sweep always sees a
//! consistent view and no lock is shared between producers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::entry::{ScheduleEntry, ScheduledTask};
use crate::error::ScheduleError;
use crate::queue::WorkItem;

/// Command buffer between handles and the owning task.
const COMMAND_CAPACITY: usize = 64;

/// Point-in-time view of one entry.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSnapshot {
    pub name: Option<String>,
    pub expression: String,
    pub next_run: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

/// A work item produced by a sweep for one passed occurrence.
#[derive(Debug)]
pub struct DueWork {
    pub schedule: String,
    pub occurrence: DateTime<Utc>,
    pub item: WorkItem,
}

enum Command {
    Add {
        entry: ScheduleEntry,
        now: DateTime<Utc>,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ScheduleSnapshot>>,
    },
    CollectDue {
        now: DateTime<Utc>,
        max_catch_up: usize,
        reply: oneshot::Sender<Vec<DueWork>>,
    },
    PruneCancelled {
        reply: oneshot::Sender<usize>,
    },
}

struct Registered {
    entry: ScheduleEntry,
    next_run: Option<DateTime<Utc>>,
}

/// Cheap, cloneable handle to the registry task.
#[derive(Clone)]
pub struct ScheduleRegistry {
    tx: mpsc::Sender<Command>,
}

impl ScheduleRegistry {
    /// Spawn the owning task. It exits once every handle is dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        tokio::spawn(run_registry(rx));
        Self { tx }
    }

    /// Validate and append a scheduled task.
    ///
    /// Validation happens before anything is sent, so a rejected task never
    /// reaches the registry.
    pub async fn add_scheduled_task(&self, task: ScheduledTask) -> Result<(), ScheduleError> {
        let entry = ScheduleEntry::validate(task)?;
        self.insert(entry, Utc::now()).await
    }

    /// Append an already validated entry, computing its first run from `now`.
    pub(crate) async fn insert(
        &self,
        entry: ScheduleEntry,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        self.request(|reply| Command::Add { entry, now, reply }).await
    }

    pub async fn snapshot(&self) -> Result<Vec<ScheduleSnapshot>, ScheduleError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn len(&self) -> Result<usize, ScheduleError> {
        Ok(self.snapshot().await?.len())
    }

    /// Drop entries whose cancellation token has fired. Returns how many.
    ///
    /// Sweeps skip such entries on their own; this only reclaims them.
    pub async fn prune_cancelled(&self) -> Result<usize, ScheduleError> {
        self.request(|reply| Command::PruneCancelled { reply }).await
    }

    /// Collect work for every live entry whose next run is at or before `now`
    /// and advance those entries past `now`.
    pub async fn collect_due(
        &self,
        now: DateTime<Utc>,
        max_catch_up: usize,
    ) -> Result<Vec<DueWork>, ScheduleError> {
        self.request(|reply| Command::CollectDue {
            now,
            max_catch_up,
            reply,
        })
        .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ScheduleError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ScheduleError::RegistryClosed)?;
        rx.await.map_err(|_| ScheduleError::RegistryClosed)
    }
}

async fn run_registry(mut rx: mpsc::Receiver<Command>) {
    let mut entries: Vec<Registered> = Vec::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Add { entry, now, reply } => {
                let next_run = entry.expression().next_after(now);
                info!(
                    schedule = %entry.display_name(),
                    cron = %entry.expression(),
                    next_run = ?next_run,
                    "Scheduled task registered"
                );
                entries.push(Registered { entry, next_run });
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let snapshot = entries
                    .iter()
                    .map(|r| ScheduleSnapshot {
                        name: r.entry.name().map(str::to_string),
                        expression: r.entry.expression().source().to_string(),
                        next_run: r.next_run,
                        cancelled: r.entry.is_cancelled(),
                    })
                    .collect();
                let _ = reply.send(snapshot);
            }
            Command::CollectDue {
                now,
                max_catch_up,
                reply,
            } => {
                let _ = reply.send(collect_due(&mut entries, now, max_catch_up));
            }
            Command::PruneCancelled { reply } => {
                let before = entries.len();
                entries.retain(|r| !r.entry.is_cancelled());
                let removed = before - entries.len();
                if removed > 0 {
                    info!(count = removed, "Pruned cancelled schedules");
                }
                let _ = reply.send(removed);
            }
        }
    }

    debug!("Schedule registry stopped");
}

fn collect_due(
    entries: &mut [Registered],
    now: DateTime<Utc>,
    max_catch_up: usize,
) -> Vec<DueWork> {
    let mut due = Vec::new();

    for registered in entries.iter_mut() {
        if registered.entry.is_cancelled() {
            continue;
        }
        // No upcoming occurrence: the rule can never fire again.
        let Some(next_run) = registered.next_run else {
            continue;
        };

        let (occurrences, next) = registered.entry.expression().due_occurrences(
            next_run,
            now,
            max_catch_up.max(1),
        );

        for occurrence in occurrences {
            due.push(DueWork {
                schedule: registered.entry.display_name().to_string(),
                occurrence,
                item: registered.entry.instantiate(),
            });
        }
        registered.next_run = next;
    }

    due
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::queue::RecurringWork;

    fn noop() -> RecurringWork {
        RecurringWork::new(|_cancel| async { Ok(()) })
    }

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, mi, 0).unwrap()
    }

    fn entry(cron: &str) -> ScheduleEntry {
        ScheduleEntry::validate(ScheduledTask::new(cron, noop())).unwrap()
    }

    #[tokio::test]
    async fn rejected_tasks_are_not_appended() {
        let registry = ScheduleRegistry::spawn();

        let missing_cron = ScheduledTask {
            work: Some(noop()),
            ..Default::default()
        };
        let missing_work = ScheduledTask {
            cron: Some("* * * * *".to_string()),
            ..Default::default()
        };

        assert!(registry.add_scheduled_task(missing_cron).await.is_err());
        assert!(registry.add_scheduled_task(ScheduledTask::new("", noop())).await.is_err());
        assert!(registry.add_scheduled_task(ScheduledTask::new("bogus", noop())).await.is_err());
        assert!(registry.add_scheduled_task(missing_work).await.is_err());
        assert_eq!(registry.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshot_reports_next_run() {
        let registry = ScheduleRegistry::spawn();
        registry.insert(entry("0 * * * *"), at(10, 15)).await.unwrap();

        let snapshot = registry.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].expression, "0 * * * *");
        assert_eq!(snapshot[0].next_run, Some(at(11, 0)));
        assert!(!snapshot[0].cancelled);
    }

    #[tokio::test]
    async fn future_occurrence_is_not_collected_early() {
        let registry = ScheduleRegistry::spawn();
        registry.insert(entry("0 * * * *"), at(10, 15)).await.unwrap();

        assert!(registry.collect_due(at(10, 59), 16).await.unwrap().is_empty());

        let due = registry.collect_due(at(11, 0), 16).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].occurrence, at(11, 0));

        // Already advanced past 11:00.
        assert!(registry.collect_due(at(11, 30), 16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_passed_occurrence_is_collected() {
        let registry = ScheduleRegistry::spawn();
        registry.insert(entry("0 * * * *"), at(8, 30)).await.unwrap();

        let due = registry.collect_due(at(11, 10), 16).await.unwrap();
        let occurrences: Vec<_> = due.iter().map(|d| d.occurrence).collect();
        assert_eq!(occurrences, vec![at(9, 0), at(10, 0), at(11, 0)]);

        let snapshot = registry.snapshot().await.unwrap();
        assert_eq!(snapshot[0].next_run, Some(at(12, 0)));
    }

    #[tokio::test]
    async fn never_firing_entry_is_accepted_but_never_due() {
        let registry = ScheduleRegistry::spawn();
        registry
            .add_scheduled_task(ScheduledTask::new("0 5 31 2 *", noop()))
            .await
            .unwrap();

        let snapshot = registry.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].next_run.is_none());

        let far_future = Utc.with_ymd_and_hms(2090, 12, 31, 0, 0, 0).unwrap();
        assert!(registry.collect_due(far_future, 16).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_entries_are_skipped_then_pruned() {
        let registry = ScheduleRegistry::spawn();
        let cancel = CancellationToken::new();
        let retired = ScheduleEntry::validate(
            ScheduledTask::new("* * * * *", noop())
                .with_name("retired")
                .with_cancellation(cancel.clone()),
        )
        .unwrap();
        registry.insert(retired, at(9, 0)).await.unwrap();
        registry.insert(entry("* * * * *"), at(9, 0)).await.unwrap();

        cancel.cancel();
        let due = registry.collect_due(at(9, 1), 16).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].schedule, "* * * * *");

        // Skipped, not removed.
        assert_eq!(registry.len().await.unwrap(), 2);
        assert!(registry.snapshot().await.unwrap()[0].cancelled);

        assert_eq!(registry.prune_cancelled().await.unwrap(), 1);
        assert_eq!(registry.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_registrations_all_land() {
        let registry = ScheduleRegistry::spawn();
        let mut handles = Vec::new();
        for i in 0..20 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .add_scheduled_task(
                        ScheduledTask::new("*/5 * * * *", noop()).with_name(format!("job-{i}")),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(registry.len().await.unwrap(), 20);
    }
}
