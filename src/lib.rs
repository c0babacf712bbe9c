//! # Chat Proxy
//!
//! An authenticated, rate-limited reverse proxy that sits between a browser
//! frontend and a chat-completion backend:
//!
//! - **Authentication**: every request must carry `X-Frontend-Secret`
//! - **Admission control**: a rolling-window quota per client address
//! - **Credential swap**: the backend only ever sees `X-Api-Secret`
//! - **Transparent relay**: backend status and JSON body come back unchanged
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → Trace → CORS → Auth → Rate Limit) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handler (POST /chat)                                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  UpstreamClient (reqwest, bounded timeouts)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Chat backend (BACKEND_URL)                                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//!
//! use chat_proxy::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config.clone())?;
//!     let app = build_router(state)?;
//!
//!     let listener = tokio::net::TcpListener::bind(config.server_addr()).await?;
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! FRONTEND_SECRET=... BACKEND_SECRET=... \
//! BACKEND_URL=http://backend:9000/chat \
//! ALLOWED_ORIGIN=https://chat.example.com cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use services::UpstreamClient;
pub use state::AppState;
