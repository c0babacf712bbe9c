use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::ErrorBody;

/// Fixed message returned for any frontend credential failure.
pub const UNAUTHORIZED_DETAIL: &str = "Unauthorized: Invalid frontend secret";

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Upstream Errors
///
/// Failures of the outbound call are split so that each maps to a stable
/// status without leaking the underlying transport error to the client:
///
/// - `UpstreamUnavailable` - connect failure, connect timeout or pool wait exceeded (502)
/// - `UpstreamTimeout` - backend did not answer within the read budget (504)
/// - `UpstreamProtocolError` - backend answered with a non-JSON body (502)
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Frontend secret missing or invalid")]
    Unauthorized,

    #[error("Rate limit exceeded: {limit} per {window_desc}")]
    RateLimitExceeded {
        limit: u32,
        window_desc: String,
        retry_after: Duration,
    },

    #[error("Malformed request body: {0}")]
    MalformedRequest(#[from] serde_json::Error),

    #[error("Chat backend unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Chat backend timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Chat backend returned an invalid response: {0}")]
    UpstreamProtocolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// HTTP status this error is surfaced as.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::FORBIDDEN,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamUnavailable(_) | AppError::UpstreamProtocolError(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::RateLimitExceeded { .. } => "rate_limited",
            AppError::MalformedRequest(_) => "malformed_request",
            AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::UpstreamTimeout(_) => "upstream_timeout",
            AppError::UpstreamProtocolError(_) => "upstream_protocol_error",
            AppError::ConfigError(_) => "config_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Full details stay in the logs; clients only see the sanitized text below
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "Request failed");
        } else {
            tracing::warn!(error = %self, kind = self.kind(), "Request rejected");
        }

        let detail = match &self {
            AppError::Unauthorized => UNAUTHORIZED_DETAIL.to_string(),
            AppError::RateLimitExceeded { .. } => self.to_string(),
            AppError::MalformedRequest(e) => sanitize_serde_error(e),
            AppError::UpstreamUnavailable(_) => {
                "Chat backend is temporarily unavailable. Please try again later.".to_string()
            }
            AppError::UpstreamTimeout(_) => {
                "Chat backend did not respond in time. Please try again.".to_string()
            }
            AppError::UpstreamProtocolError(_) => {
                "Chat backend returned an invalid response.".to_string()
            }
            AppError::ConfigError(_) => {
                "Service configuration error. Please contact support.".to_string()
            }
        };

        let mut response = (status, axum::Json(ErrorBody { detail })).into_response();

        if let AppError::RateLimitExceeded {
            limit, retry_after, ..
        } = &self
        {
            let headers = response.headers_mut();
            // Round up so clients never retry before the slot frees
            let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            let retry_secs = retry_secs.max(1);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_secs));
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        }

        response
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
fn sanitize_serde_error(e: &serde_json::Error) -> String {
    let msg = e.to_string();

    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if e.is_eof() || e.is_syntax() {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
