//! Graceful shutdown on process signals.
//!
//! SIGTERM and SIGINT (Ctrl+C) both stop the server: the socket is closed,
//! in-flight requests get the configured grace period, and `serve` returns.

use std::sync::Arc;

use super::server::RunningServer;

/// Stop `server` when SIGTERM or SIGINT is received.
///
/// Runs in the background and does not block.
pub fn setup_shutdown_handler(server: Arc<RunningServer>) {
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        tracing::info!(%signal, "Received signal, initiating graceful shutdown");

        match server.stop().await {
            Ok(()) => tracing::info!("Graceful shutdown complete"),
            Err(e) => tracing::error!(error = %e, "Graceful shutdown failed"),
        }
    });
}

/// Resolves with the name of the first shutdown signal received.
///
/// If a handler cannot be installed that signal is never reported; the
/// other one still is.
async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
