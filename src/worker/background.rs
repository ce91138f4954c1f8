//! Start/stop plumbing shared by every hosted loop.
//!
//! A [`BackgroundLoop`] owns the lifecycle of one spawned task: it hands the
//! loop a stop token derived from the host token, records state transitions,
//! and bounds the stop wait by the caller's token.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{Lifecycle, WorkerState};
use crate::error::WorkerError;

struct RunningLoop {
    stopping: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct BackgroundLoop {
    name: String,
    lifecycle: Arc<Mutex<Lifecycle>>,
    running: tokio::sync::Mutex<Option<RunningLoop>>,
}

impl BackgroundLoop {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: Arc::new(Mutex::new(Lifecycle::new())),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state()
    }

    /// Launch `run` with a stop token that is a child of `cancel`.
    ///
    /// If `cancel` has already fired the loop would finish immediately, so
    /// nothing is spawned and the service is reported as stopped.
    pub async fn start<F, Fut>(&self, cancel: &CancellationToken, run: F) -> Result<(), WorkerError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock().await;
        if running.is_some() || self.state() != WorkerState::Created {
            return Err(WorkerError::AlreadyStarted {
                name: self.name.clone(),
            });
        }

        if cancel.is_cancelled() {
            transition(&self.lifecycle, &self.name, WorkerState::Stopped);
            info!(worker = %self.name, "Start cancelled before launch, service stopped");
            return Ok(());
        }

        transition(&self.lifecycle, &self.name, WorkerState::Started);

        let stopping = cancel.child_token();
        let fut = run(stopping.clone());
        let lifecycle = Arc::clone(&self.lifecycle);
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            transition(&lifecycle, &name, WorkerState::Running);
            fut.await;
            transition(&lifecycle, &name, WorkerState::Stopped);
            info!(worker = %name, "Background loop exited");
        });

        *running = Some(RunningLoop { stopping, handle });
        info!(worker = %self.name, "Background loop started");
        Ok(())
    }

    /// Signal the loop and wait for it, giving up once `cancel` fires.
    ///
    /// Calling this before `start` does nothing.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        let Some(RunningLoop {
            stopping,
            mut handle,
        }) = self.running.lock().await.take()
        else {
            debug!(worker = %self.name, "Stop requested but loop was never started");
            return Ok(());
        };

        transition(&self.lifecycle, &self.name, WorkerState::StopRequested);
        stopping.cancel();

        tokio::select! {
            joined = &mut handle => match joined {
                Ok(()) => Ok(()),
                Err(e) => {
                    transition(&self.lifecycle, &self.name, WorkerState::Stopped);
                    Err(WorkerError::Join {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    })
                }
            },
            _ = cancel.cancelled() => {
                warn!(
                    worker = %self.name,
                    "Stop deadline reached before loop exited, continuing shutdown"
                );
                Ok(())
            }
        }
    }
}

/// Apply a transition, ignoring ones a racing loop has already made moot.
fn transition(lifecycle: &Mutex<Lifecycle>, name: &str, target: WorkerState) {
    let mut lifecycle = lifecycle
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Err(reason) = lifecycle.transition_to(target) {
        debug!(worker = %name, "Skipped state change: {}", reason);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn stop_before_start_is_noop() {
        let background = BackgroundLoop::new("idle");
        background.stop(&CancellationToken::new()).await.unwrap();
        assert_eq!(background.state(), WorkerState::Created);
    }

    #[tokio::test]
    async fn start_then_stop() {
        let background = BackgroundLoop::new("loop");
        background
            .start(&CancellationToken::new(), |stopping| async move {
                stopping.cancelled().await;
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(background.state(), WorkerState::Running);

        background.stop(&CancellationToken::new()).await.unwrap();
        assert_eq!(background.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let background = BackgroundLoop::new("twice");
        let cancel = CancellationToken::new();
        background
            .start(&cancel, |stopping| async move { stopping.cancelled().await })
            .await
            .unwrap();

        let err = background
            .start(&cancel, |stopping| async move { stopping.cancelled().await })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyStarted { .. }));

        background.stop(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn start_with_fired_token_reports_stopped() {
        let background = BackgroundLoop::new("late");
        let cancel = CancellationToken::new();
        cancel.cancel();

        background
            .start(&cancel, |_stopping| async {})
            .await
            .unwrap();
        assert_eq!(background.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_bounded_by_deadline() {
        let background = BackgroundLoop::new("stubborn");
        background
            .start(&CancellationToken::new(), |_stopping| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .await
            .unwrap();

        let deadline = CancellationToken::new();
        let timer = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            timer.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), background.stop(&deadline))
            .await
            .expect("stop ignored its deadline")
            .unwrap();
        assert_eq!(background.state(), WorkerState::StopRequested);
    }

    #[tokio::test]
    async fn host_token_stops_loop() {
        let background = BackgroundLoop::new("host");
        let host = CancellationToken::new();
        background
            .start(&host, |stopping| async move { stopping.cancelled().await })
            .await
            .unwrap();

        host.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(background.state(), WorkerState::Stopped);
    }
}
