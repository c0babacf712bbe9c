//! Frontend secret authentication middleware.
//!
//! # Security Features
//!
//! - **Constant-time comparison**: Prevents timing attacks on secret validation
//! - **Uniform failure**: A missing header and a wrong value produce the same
//!   403 response, so clients cannot tell which one happened
//! - **Header only**: The secret is never read from the query string
//!
//! # Usage
//!
//! ```bash
//! curl -X POST http://localhost:8000/chat \
//!   -H "X-Frontend-Secret: $FRONTEND_SECRET" \
//!   -H "Content-Type: application/json" \
//!   -d '{"messages":[{"role":"user","content":"hi"}]}'
//! ```
//!
//! CORS preflight requests are answered by the CORS layer, which runs
//! outside this one, so browsers can discover the allowed headers without
//! presenting the secret.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::peer_addr;
use crate::error::AppError;
use crate::metrics;

/// Header carrying the frontend credential.
pub const FRONTEND_SECRET_HEADER: &str = "x-frontend-secret";

/// Frontend secret authentication layer.
#[derive(Clone)]
pub struct FrontendSecretAuth {
    expected: Arc<String>,
}

impl FrontendSecretAuth {
    /// Create a new auth layer requiring `secret` on every request.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            expected: Arc::new(secret.into()),
        }
    }
}

impl<S> Layer<S> for FrontendSecretAuth {
    type Service = FrontendSecretAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FrontendSecretAuthService {
            inner,
            expected: self.expected.clone(),
        }
    }
}

/// Frontend secret authentication service wrapper.
#[derive(Clone)]
pub struct FrontendSecretAuthService<S> {
    inner: S,
    expected: Arc<String>,
}

impl<S> Service<Request<Body>> for FrontendSecretAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let authorized = is_authorized(&req, &self.expected);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if authorized {
                debug!("Frontend secret accepted");
                return inner.call(req).await;
            }

            warn!(
                path = %req.uri().path(),
                peer = ?peer_addr(&req),
                "Missing or invalid frontend secret"
            );
            metrics::record_auth_failure();
            Ok(AppError::Unauthorized.into_response())
        })
    }
}

/// Check the frontend secret header against the expected value.
///
/// A missing or non-UTF-8 header compares as the empty string so that the
/// failure path does the same work as a mismatch.
fn is_authorized<B>(req: &Request<B>, expected: &str) -> bool {
    let provided = req
        .headers()
        .get(FRONTEND_SECRET_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();

    constant_time_eq(provided, expected.as_bytes())
}

/// Perform constant-time comparison of two byte strings.
///
/// Length differences return early; only the secret's content is protected.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_authorized_with_matching_header() {
        let req = Request::builder()
            .header("x-frontend-secret", "correct-secret")
            .body(Body::empty())
            .unwrap();

        assert!(is_authorized(&req, "correct-secret"));
    }

    #[test]
    fn test_header_name_is_case_insensitive() {
        let req = Request::builder()
            .header("X-Frontend-Secret", "correct-secret")
            .body(Body::empty())
            .unwrap();

        assert!(is_authorized(&req, "correct-secret"));
    }

    #[test]
    fn test_rejected_with_wrong_value() {
        let req = Request::builder()
            .header("x-frontend-secret", "wrong-secret")
            .body(Body::empty())
            .unwrap();

        assert!(!is_authorized(&req, "correct-secret"));
    }

    #[test]
    fn test_rejected_without_header() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(!is_authorized(&req, "correct-secret"));
    }

    #[test]
    fn test_rejected_with_empty_header() {
        let req = Request::builder()
            .header("x-frontend-secret", "")
            .body(Body::empty())
            .unwrap();

        assert!(!is_authorized(&req, "correct-secret"));
    }

    #[test]
    fn test_value_is_case_sensitive() {
        let req = Request::builder()
            .header("x-frontend-secret", "Correct-Secret")
            .body(Body::empty())
            .unwrap();

        assert!(!is_authorized(&req, "correct-secret"));
    }

    #[test]
    fn test_query_parameter_is_not_accepted() {
        let req = Request::builder()
            .uri("/chat?x-frontend-secret=correct-secret")
            .body(Body::empty())
            .unwrap();

        assert!(!is_authorized(&req, "correct-secret"));
    }

    #[test]
    fn test_other_credential_headers_are_not_accepted() {
        let req = Request::builder()
            .header("x-api-secret", "correct-secret")
            .header("authorization", "Bearer correct-secret")
            .body(Body::empty())
            .unwrap();

        assert!(!is_authorized(&req, "correct-secret"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret123", b"secret123"));
        assert!(!constant_time_eq(b"secret123", b"secret456"));
        assert!(!constant_time_eq(b"short", b"much-longer-string"));
    }
}
