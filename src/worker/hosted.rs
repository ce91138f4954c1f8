//! Hosted service contract and a minimal host that drives it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::state::WorkerState;
use crate::error::WorkerError;

/// A component whose start/stop lifecycle is driven by the application host.
#[async_trait]
pub trait HostedService: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> WorkerState;

    /// Launch the service. `cancel` is the host-wide shutdown signal.
    async fn start(&self, cancel: &CancellationToken) -> Result<(), WorkerError>;

    /// Stop the service, waiting for it until `cancel` fires.
    async fn stop(&self, cancel: &CancellationToken) -> Result<(), WorkerError>;
}

/// Starts services in registration order and stops them in reverse.
pub struct ServiceHost {
    services: Vec<Arc<dyn HostedService>>,
    shutdown_timeout: Duration,
    cancel: CancellationToken,
}

impl ServiceHost {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            services: Vec::new(),
            shutdown_timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn add(&mut self, service: Arc<dyn HostedService>) {
        self.services.push(service);
    }

    /// The host-wide shutdown token handed to every service on start.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        for service in &self.services {
            service.start(&self.cancel).await?;
            info!(service = %service.name(), "Hosted service started");
        }
        Ok(())
    }

    /// Stop every service, bounding the whole phase by the shutdown timeout.
    pub async fn stop(&self) {
        let deadline = CancellationToken::new();
        let timer = deadline.clone();
        let timeout = self.shutdown_timeout;
        let timer_handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer.cancel();
        });

        for service in self.services.iter().rev() {
            match service.stop(&deadline).await {
                Ok(()) => {
                    info!(
                        service = %service.name(),
                        state = %service.state(),
                        "Hosted service stopped"
                    );
                }
                Err(e) => {
                    error!(service = %service.name(), error = %e, "Hosted service failed to stop");
                }
            }
        }

        timer_handle.abort();
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl HostedService for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn state(&self) -> WorkerState {
            WorkerState::Created
        }

        async fn start(&self, _cancel: &CancellationToken) -> Result<(), WorkerError> {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&self, _cancel: &CancellationToken) -> Result<(), WorkerError> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn stops_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut host = ServiceHost::new(Duration::from_secs(1));
        for name in ["worker", "scheduler"] {
            host.add(Arc::new(Recorder {
                name: name.to_string(),
                log: Arc::clone(&log),
            }));
        }

        host.start().await.unwrap();
        host.stop().await;

        assert_eq!(
            *log.lock().unwrap(),
            ["start worker", "start scheduler", "stop scheduler", "stop worker"]
        );
        assert!(host.cancellation_token().is_cancelled());
    }
}
