use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};

use chat_proxy::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    // Logging settings live in the config, so a config error is reported
    // through a default subscriber
    let config = match Config::from_env() {
        Ok(config) => {
            utils::init_tracing(&config.log_level, config.log_json);
            config
        }
        Err(e) => {
            utils::init_tracing("info", false);
            error!("Configuration error: {e}");
            return Err(exitcode::CONFIG);
        }
    };

    info!("Starting chat proxy v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.host,
        port = config.port,
        backend = %config.backend_url,
        rate_limit = config.rate_limit_requests,
        window_secs = config.rate_limit_window.as_secs(),
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let state = AppState::new(config.clone()).map_err(|e| {
        error!("Failed to build application state: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("  POST /chat - Relay a conversation to the chat backend");

    // Peer addresses are needed to key the rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
