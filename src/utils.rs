//! Process-level helpers: logging setup and shutdown signals.

use tokio::signal;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `filter` uses `RUST_LOG` syntax; an unparsable filter falls back to `info`.
/// With `json` set, every event is written as one JSON object per line.
pub fn init_tracing(filter: &str, json: bool) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().with_current_span(true).init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
///
/// If one of the handlers cannot be installed the error is logged and only
/// the other signal is awaited.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
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
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, draining in-flight chat requests...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, draining in-flight chat requests...");
        }
    }
}
