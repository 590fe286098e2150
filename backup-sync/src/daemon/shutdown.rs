//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! A signal cancels the run token: in-flight node syncs stop at their next
//! suspension point, no further units are dispatched, and nodes that already
//! reached `RemoteAndLocal` stay synced.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to hand to a backup run
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the run without waiting for a signal
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Wait for SIGINT or SIGTERM, then cancel the token.
    ///
    /// Returns early if the token is cancelled by someone else. When a handler
    /// cannot be installed the corresponding signal is simply never observed.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), cancelling backup...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling backup...");
            }
            _ = self.token.cancelled() => {
                return;
            }
        }

        self.trigger();
    }
}
