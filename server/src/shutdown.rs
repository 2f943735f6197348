//! Graceful shutdown: stop accepting, close every connection with 1001,
//! then wait (bounded) for their read loops to deregister.

use std::time::Duration;

use crate::ws::broadcast::close_all;
use crate::ws::ConnectionRegistry;

pub const GOING_AWAY: u16 = 1001;
pub const SHUTDOWN_REASON: &str = "server shutting down";

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Ask every connection to close and wait until the registry is empty or
/// `timeout` elapses. Returns whether the registry drained in time.
pub async fn drain_connections(registry: &ConnectionRegistry, timeout: Duration) -> bool {
    let closing = close_all(registry, GOING_AWAY, SHUTDOWN_REASON);
    tracing::info!(connections = closing, "Closing real-time connections");

    let drained = tokio::time::timeout(timeout, async {
        while !registry.is_empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    })
    .await
    .is_ok();

    if drained {
        tracing::info!("All connections drained");
    } else {
        tracing::warn!(
            remaining = registry.len(),
            "Shutdown timeout reached with connections still open"
        );
    }
    drained
}
