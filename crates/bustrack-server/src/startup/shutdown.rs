//! Graceful shutdown handling

use std::time::Duration;

use bustrack_core::DistributionHub;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a listener for Ctrl+C / SIGTERM and return the signal it triggers
pub async fn wait_for_shutdown_signal() -> ShutdownSignal {
    let shutdown = ShutdownSignal::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        shutdown_clone.shutdown();
    });

    shutdown
}

/// How often the session registry is checked while draining
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// On the shutdown signal, asks the hub to end every session and waits for
/// the registry to empty, bounded by `shutdown_timeout`
pub struct GracefulShutdown {
    shutdown_signal: ShutdownSignal,
    hub: DistributionHub,
    shutdown_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(
        shutdown_signal: ShutdownSignal,
        hub: DistributionHub,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            shutdown_signal,
            hub,
            shutdown_timeout,
        }
    }

    pub async fn wait_for_shutdown(&self) {
        let mut receiver = self.shutdown_signal.subscribe();
        let _ = receiver.recv().await;

        info!(
            sessions = self.hub.registry().count(),
            timeout_ms = self.shutdown_timeout.as_millis() as u64,
            "Shutdown initiated, closing sessions"
        );
        self.hub.shutdown();

        let remaining = self.drain_sessions().await;
        if remaining == 0 {
            info!("All sessions closed, shutdown complete");
        } else {
            warn!(remaining, "Shutdown timeout reached with sessions still open");
        }
    }

    /// Returns the number of sessions still registered when draining stopped
    async fn drain_sessions(&self) -> usize {
        let deadline = Instant::now() + self.shutdown_timeout;
        let registry = self.hub.registry();

        loop {
            let open = registry.count();
            if open == 0 || Instant::now() >= deadline {
                return open;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(DRAIN_POLL.min(left)).await;
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.shutdown_signal.clone()
    }
}

/// Run `future` unless a shutdown signal arrives first
pub async fn run_with_shutdown<F, T>(
    future: F,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        result = future => Some(result),
        _ = shutdown_rx.recv() => {
            warn!("Shutdown signal received, cancelling operation");
            None
        }
    }
}
