//! Scheduled processor: periodic sweep that feeds due schedules into the
//! task queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::entry::ScheduledTask;
use super::registry::ScheduleRegistry;
use crate::config::TaskConfig;
use crate::error::{QueueError, ScheduleError, WorkerError};
use crate::queue::BackgroundTaskQueue;
use crate::worker::{BackgroundLoop, HostedService, WorkerState};

#[derive(Debug, Clone, Copy)]
struct SweepSettings {
    sweep_interval: Duration,
    entry_delay: Duration,
    max_catch_up: usize,
}

/// Hosted loop that sweeps a [`ScheduleRegistry`] and enqueues due work.
pub struct ScheduledProcessor {
    registry: ScheduleRegistry,
    queue: Arc<BackgroundTaskQueue>,
    background: BackgroundLoop,
    settings: SweepSettings,
}

impl ScheduledProcessor {
    pub fn new(
        registry: ScheduleRegistry,
        queue: Arc<BackgroundTaskQueue>,
        config: &TaskConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            background: BackgroundLoop::new("scheduled-processor"),
            settings: SweepSettings {
                sweep_interval: config.sweep_interval,
                entry_delay: config.entry_delay,
                max_catch_up: config.max_catch_up,
            },
        }
    }

    pub fn registry(&self) -> &ScheduleRegistry {
        &self.registry
    }

    pub async fn add_scheduled_task(&self, task: ScheduledTask) -> Result<(), ScheduleError> {
        self.registry.add_scheduled_task(task).await
    }

    /// Run one sweep as if the clock read `now`. Returns how many items were
    /// enqueued.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, ScheduleError> {
        sweep(
            &self.registry,
            &self.queue,
            &self.settings,
            now,
            &CancellationToken::new(),
        )
        .await
    }
}

#[async_trait]
impl HostedService for ScheduledProcessor {
    fn name(&self) -> &str {
        self.background.name()
    }

    fn state(&self) -> WorkerState {
        self.background.state()
    }

    async fn start(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        let registry = self.registry.clone();
        let queue = Arc::clone(&self.queue);
        let settings = self.settings;
        self.background
            .start(cancel, move |stopping| {
                run_sweeps(registry, queue, settings, stopping)
            })
            .await
    }

    async fn stop(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        self.background.stop(cancel).await
    }
}

async fn run_sweeps(
    registry: ScheduleRegistry,
    queue: Arc<BackgroundTaskQueue>,
    settings: SweepSettings,
    stopping: CancellationToken,
) {
    info!(
        interval = ?settings.sweep_interval,
        "Schedule sweep loop is running"
    );

    loop {
        match sweep(&registry, &queue, &settings, Utc::now(), &stopping).await {
            Ok(0) => {}
            Ok(count) => debug!(count, "Sweep enqueued scheduled work"),
            Err(ScheduleError::RegistryClosed) => {
                error!("Schedule registry closed, sweep loop exiting");
                break;
            }
            Err(e) => error!(error = %e, "Sweep failed"),
        }

        tokio::select! {
            _ = stopping.cancelled() => break,
            _ = tokio::time::sleep(settings.sweep_interval) => {}
        }
    }
}

async fn sweep(
    registry: &ScheduleRegistry,
    queue: &BackgroundTaskQueue,
    settings: &SweepSettings,
    now: DateTime<Utc>,
    stopping: &CancellationToken,
) -> Result<usize, ScheduleError> {
    let due = registry.collect_due(now, settings.max_catch_up).await?;
    let mut enqueued = 0;

    for (index, work) in due.into_iter().enumerate() {
        if index > 0 && !settings.entry_delay.is_zero() {
            tokio::select! {
                _ = stopping.cancelled() => break,
                _ = tokio::time::sleep(settings.entry_delay) => {}
            }
        }

        info!(
            schedule = %work.schedule,
            occurrence = %work.occurrence,
            "Scheduled task due, enqueuing"
        );

        match queue.enqueue_wait(work.item, stopping).await {
            Ok(()) => enqueued += 1,
            Err(QueueError::Cancelled) => break,
            Err(e) => {
                warn!(schedule = %work.schedule, error = %e, "Could not enqueue scheduled task");
            }
        }
    }

    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::queue::RecurringWork;
    use crate::schedule::entry::ScheduleEntry;

    fn noop() -> RecurringWork {
        RecurringWork::new(|_cancel| async { Ok(()) })
    }

    fn fast_config() -> TaskConfig {
        TaskConfig {
            sweep_interval: Duration::from_millis(20),
            entry_delay: Duration::ZERO,
            ..TaskConfig::default()
        }
    }

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, mi, 0).unwrap()
    }

    #[tokio::test]
    async fn sweep_enqueues_only_due_entries() {
        let queue = BackgroundTaskQueue::unbounded();
        let processor = ScheduledProcessor::new(
            ScheduleRegistry::spawn(),
            Arc::clone(&queue),
            &fast_config(),
        );
        let hourly =
            ScheduleEntry::validate(ScheduledTask::new("0 * * * *", noop()).with_name("hourly"))
                .unwrap();
        processor.registry().insert(hourly, at(9, 30)).await.unwrap();

        assert_eq!(processor.sweep_at(at(9, 59)).await.unwrap(), 0);
        assert!(queue.is_empty());

        assert_eq!(processor.sweep_at(at(10, 0)).await.unwrap(), 1);
        let item = queue.dequeue(&CancellationToken::new()).await.unwrap();
        assert_eq!(item.label(), Some("hourly"));
    }

    #[tokio::test]
    async fn never_firing_schedule_is_never_enqueued() {
        let queue = BackgroundTaskQueue::unbounded();
        let processor = ScheduledProcessor::new(
            ScheduleRegistry::spawn(),
            Arc::clone(&queue),
            &fast_config(),
        );
        processor
            .add_scheduled_task(ScheduledTask::new("0 5 31 2 *", noop()))
            .await
            .unwrap();

        for year in [2027, 2032, 2040] {
            let now = Utc.with_ymd_and_hms(year, 3, 1, 0, 0, 0).unwrap();
            assert_eq!(processor.sweep_at(now).await.unwrap(), 0);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn sweep_waits_for_space_on_bounded_queue() {
        let queue = BackgroundTaskQueue::bounded(1);
        let processor = ScheduledProcessor::new(
            ScheduleRegistry::spawn(),
            Arc::clone(&queue),
            &fast_config(),
        );
        let minutely = ScheduleEntry::validate(ScheduledTask::new("* * * * *", noop())).unwrap();
        processor.registry().insert(minutely, at(9, 0)).await.unwrap();

        let consumer_queue = Arc::clone(&queue);
        let consumer = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            for _ in 0..3 {
                consumer_queue.dequeue(&cancel).await.unwrap();
            }
        });

        assert_eq!(processor.sweep_at(at(9, 3)).await.unwrap(), 3);
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn processor_lifecycle() {
        let queue = BackgroundTaskQueue::unbounded();
        let processor =
            ScheduledProcessor::new(ScheduleRegistry::spawn(), queue, &fast_config());

        processor.stop(&CancellationToken::new()).await.unwrap();
        assert_eq!(processor.state(), WorkerState::Created);

        processor.start(&CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.state(), WorkerState::Running);

        processor.stop(&CancellationToken::new()).await.unwrap();
        assert_eq!(processor.state(), WorkerState::Stopped);
    }
}
