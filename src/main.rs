use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use assistant_tasks::queue::{BackgroundTask, BackgroundTaskQueue, RecurringWork};
use assistant_tasks::schedule::{ScheduleRegistry, ScheduledProcessor, ScheduledTask};
use assistant_tasks::worker::{QueuedHostedService, ServiceHost};
use assistant_tasks::{TaskConfig, WorkError};

/// Logs a line on every tick so a running daemon is visibly alive.
struct Heartbeat {
    queue: Arc<BackgroundTaskQueue>,
    beats: AtomicU64,
}

#[async_trait]
impl BackgroundTask for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn run(&self, _cancel: CancellationToken) -> Result<(), WorkError> {
        let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(beat, queued = self.queue.len(), "Heartbeat");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = TaskConfig::from_env()?;
    let heartbeat_cron =
        std::env::var("TASKS_HEARTBEAT_CRON").unwrap_or_else(|_| "0 * * * * *".to_string());

    eprintln!("⚙️  Assistant Tasks v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Queue: {}",
        config
            .queue_capacity
            .map(|c| format!("bounded ({c})"))
            .unwrap_or_else(|| "unbounded".to_string())
    );
    eprintln!("   Sweep: every {:?}", config.sweep_interval);
    eprintln!("   Heartbeat: {}", heartbeat_cron);
    eprintln!("   Press Ctrl-C to stop.\n");

    // ── Queue + worker ──────────────────────────────────────────────────
    let queue = BackgroundTaskQueue::with_capacity(config.queue_capacity);
    let worker = Arc::new(QueuedHostedService::new(Arc::clone(&queue), &config));

    // ── Schedules ───────────────────────────────────────────────────────
    let processor = Arc::new(ScheduledProcessor::new(
        ScheduleRegistry::spawn(),
        Arc::clone(&queue),
        &config,
    ));
    let heartbeat = Arc::new(Heartbeat {
        queue: Arc::clone(&queue),
        beats: AtomicU64::new(0),
    });
    processor
        .add_scheduled_task(
            ScheduledTask::new(heartbeat_cron, RecurringWork::from_task(heartbeat))
                .with_name("heartbeat"),
        )
        .await?;
    let schedules = serde_json::to_string(&processor.registry().snapshot().await?)?;
    tracing::info!(%schedules, "Schedules registered");

    // ── Host ────────────────────────────────────────────────────────────
    let mut host = ServiceHost::new(config.shutdown_timeout);
    host.add(worker.clone());
    host.add(processor);
    host.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    host.stop().await;

    let stats = worker.stats();
    eprintln!(
        "   Processed {} items: {}",
        stats.processed(),
        serde_json::to_string(&stats)?
    );

    Ok(())
}
