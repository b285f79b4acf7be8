//! Process lifecycle: start the Mux, wait for a shutdown trigger, stop it
//! exactly once.
//!
//! [`run`] waits on process signals (SIGINT, SIGTERM, SIGQUIT). Embedders
//! and tests use [`run_until`] with their own trigger future. Either way a
//! listener failure ends the wait early and becomes the returned error.

use std::future::Future;

use crate::error::MuxError;
use crate::mux::Mux;

/// Resolves on the first SIGINT (Ctrl+C), SIGTERM or SIGQUIT.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(tokio::signal::unix::SignalKind::terminate(), "SIGTERM");
    #[cfg(unix)]
    let quit = unix_signal(tokio::signal::unix::SignalKind::quit(), "SIGQUIT");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
        () = quit => tracing::info!("received SIGQUIT"),
    }
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind, name: &'static str) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut signal) => {
            signal.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, signal = name, "failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}

/// Start `mux` and serve until a process signal arrives.
pub async fn run(mux: &Mux) -> Result<(), MuxError> {
    run_until(mux, shutdown_signal()).await
}

/// Start `mux` and serve until `trigger` resolves or the listener fails.
///
/// The Mux is always stopped before returning, so the audit path is
/// closed even when starting fails.
pub async fn run_until<F>(mux: &Mux, trigger: F) -> Result<(), MuxError>
where
    F: Future<Output = ()>,
{
    if let Err(e) = mux.start().await {
        if let Err(stop_err) = mux.stop().await {
            tracing::warn!(error = %stop_err, "error while stopping after failed start");
        }
        return Err(e);
    }

    tokio::select! {
        () = trigger => tracing::info!("shutdown requested"),
        () = mux.closed() => tracing::warn!("listener closed, shutting down"),
    }

    mux.stop().await
}
