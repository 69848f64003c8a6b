//! Signal handling for graceful shutdown.

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Completes when SIGTERM or SIGINT (Ctrl+C) is received.
///
/// If a handler cannot be installed the other one still works; with
/// neither installed this waits forever and the process must be killed.
pub async fn shutdown_signal() {
    let sigterm = signal(SignalKind::terminate())
        .map_err(|e| warn!(error = %e, "Failed to install SIGTERM handler"))
        .ok();
    let sigint = signal(SignalKind::interrupt())
        .map_err(|e| warn!(error = %e, "Failed to install SIGINT handler"))
        .ok();

    let terminate = async {
        match sigterm {
            Some(mut s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    let interrupt = async {
        match sigint {
            Some(mut s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        _ = interrupt => info!("Received SIGINT, initiating graceful shutdown"),
    }
}
