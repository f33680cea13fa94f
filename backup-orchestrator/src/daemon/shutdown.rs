//! Graceful shutdown on SIGTERM and SIGINT.
//!
//! A signal cancels the shared token; running tools are then stopped by
//! their supervisor and no further workflow step starts.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Token cancelled once shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Start shutdown without a signal.
    pub fn trigger(&self, reason: &str) {
        if !self.token.is_cancelled() {
            info!("Shutting down: {}", reason);
            self.token.cancel();
        }
    }

    /// Wait for SIGINT or SIGTERM (or an earlier trigger), then cancel.
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
                    warn!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => self.trigger("received SIGINT"),
            _ = terminate => self.trigger("received SIGTERM"),
            _ = self.token.cancelled() => {}
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
