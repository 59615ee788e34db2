// Unix signal handling for graceful shutdown
// Captures SIGTERM and SIGINT so the server and scheduler stop cleanly

use anyhow::Result;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tracing::{debug, info};

/// Create a future that resolves when a shutdown signal is received
pub fn create_shutdown_listener() -> Result<impl std::future::Future<Output = ()>> {
    let signals = Signals::new([SIGTERM, SIGINT])?;

    Ok(async move {
        let mut signals = signals;

        while let Some(signal) = signals.next().await {
            match signal {
                SIGTERM => {
                    info!("Received SIGTERM - graceful shutdown initiated");
                    break;
                }
                SIGINT => {
                    info!("Received SIGINT (Ctrl+C) - graceful shutdown initiated");
                    break;
                }
                _ => {
                    debug!(signal, "Received unexpected signal");
                }
            }
        }
    })
}

/// Fans a single shutdown out to every long-running task
pub struct ShutdownCoordinator {
    tx: tokio::sync::broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(4);
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Future that resolves on the next trigger, for `with_graceful_shutdown`
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
        info!("Shutdown signal broadcast to all subsystems");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
