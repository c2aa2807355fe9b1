//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT)
//! - Translate the first signal into a shutdown trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A failed handler registration is logged and leaves the other one active

use tracing::{info, warn};

use super::shutdown::Shutdown;

/// Wait for SIGINT or SIGTERM, then trigger `shutdown`.
///
/// Returns early without triggering if shutdown was already requested by
/// someone else.
pub async fn listen_for_shutdown(shutdown: Shutdown) {
    tokio::select! {
        name = wait_for_signal() => {
            info!(signal = name, "Shutdown signal received");
            shutdown.trigger();
        }
        _ = shutdown.triggered() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "Failed to register SIGTERM handler");
            None
        }
    };
    let sigterm = async {
        match term.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
            "SIGINT"
        }
        _ = sigterm => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    "ctrl-c"
}
