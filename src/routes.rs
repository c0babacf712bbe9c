//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Adds X-Request-Id header
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Answers preflight, decorates responses
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 403 if X-Frontend-Secret is wrong
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Limit     │ ← 413 above MAX_REQUEST_BODY_SIZE
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if the client's window is full (matched routes only)
//! └────────┬─────────┘
//!          ▼
//!      POST /chat
//! ```
//!
//! Unknown paths (404) and other methods on `/chat` (405) are answered
//! without touching the limiter.
//!
//! Rejected credentials never reach the limiter, so they neither consume
//! quota nor turn into 429s.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use axum::routing::post;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::handlers;
use crate::middleware::{
    FrontendSecretAuth, REQUEST_ID_HEADER, RateLimitLayer, RequestIdLayer, TrustedProxyConfig,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Errors
///
/// Returns `AppError::ConfigError` if an allowed origin is not a valid
/// header value.
pub fn build_router(state: AppState) -> AppResult<Router> {
    let config = state.config.clone();

    let cors = build_cors_layer(&config.cors_allowed_origins)?;

    let mut chat = post(handlers::chat);

    // 1. Rate limiting (if enabled). Wraps the POST endpoint only, so 404s
    //    and 405s never reach the limiter and cost no quota
    if let Some(limiter) = &state.limiter {
        info!(
            limit = limiter.limit(),
            window_secs = limiter.window().as_secs(),
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        chat = chat.route_layer(RateLimitLayer::new(
            limiter.clone(),
            TrustedProxyConfig::new(&config.trusted_proxies),
        ));
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_REQUESTS=0)");
    }

    let mut router = Router::new().route("/chat", chat);

    // Applied bottom to top: the last layer added runs first

    // 2. Request body size limit
    info!(
        max_bytes = config.max_request_body_size,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 3. Authentication
    router = router.layer(FrontendSecretAuth::new(config.frontend_secret.clone()));

    // 4. CORS
    router = router.layer(cors);

    // 5. Tracing
    router = router.layer(TraceLayer::new_for_http());

    // 6. Request ID
    router = router.layer(RequestIdLayer::new());

    Ok(router.with_state(state))
}

/// Build CORS layer from configuration.
///
/// - `[]` - no cross-origin access
/// - `["*"]` - any origin, without credentials
/// - explicit origins - those origins, with credentials; methods and headers
///   are mirrored from the preflight since wildcards are not allowed
///   alongside credentials
fn build_cors_layer(allowed_origins: &[String]) -> AppResult<CorsLayer> {
    let exposed = [
        HeaderName::from_static(REQUEST_ID_HEADER),
        RETRY_AFTER,
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderName::from_static("x-ratelimit-remaining"),
    ];

    if allowed_origins.is_empty() {
        info!("CORS disabled (no ALLOWED_ORIGIN set)");
        return Ok(CorsLayer::new());
    }

    if allowed_origins.iter().any(|o| o == "*") {
        info!("CORS allows any origin");
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(exposed));
    }

    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| AppError::ConfigError(format!("Invalid CORS origin: {o}")))
        })
        .collect::<AppResult<Vec<_>>>()?;

    info!(origins = ?allowed_origins, "CORS configured");
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers(exposed))
}
