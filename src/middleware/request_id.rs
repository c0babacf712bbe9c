//! Request ID middleware for correlating proxy and backend logs.
//!
//! # Features
//!
//! - Accepts a client-supplied `X-Request-Id` (printable ASCII, bounded length)
//! - Generates a UUIDv4 otherwise
//! - Stores the ID as a [`RequestId`] request extension; the chat handler
//!   forwards it upstream so backend logs line up with ours
//! - Echoes the ID on every response, including 403/429 rejections
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:8000/chat ...
//! ```

use std::fmt;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Span, debug};
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied ID we will echo back.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation ID for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(HeaderValue);

impl RequestId {
    /// Header form of the ID.
    pub fn header_value(&self) -> &HeaderValue {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Only ever built from visible ASCII
        self.0.to_str().unwrap_or_default()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request ID layer for Tower middleware stack.
#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    /// Create a new request ID layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Request ID service wrapper.
#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let request_id = extract_or_generate_request_id(&req);

        Span::current().record("request_id", request_id.as_str());
        debug!(request_id = %request_id, "Processing request");

        req.extensions_mut().insert(request_id.clone());
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            response
                .headers_mut()
                .insert(REQUEST_ID_HEADER, request_id.0);
            Ok(response)
        })
    }
}

/// Use the client's request ID when it is safe to echo, otherwise mint one.
fn extract_or_generate_request_id<B>(req: &Request<B>) -> RequestId {
    if let Some(value) = req.headers().get(REQUEST_ID_HEADER)
        && is_acceptable(value)
    {
        return RequestId(value.clone());
    }

    let generated = Uuid::new_v4().hyphenated().to_string();
    // A hyphenated UUID is always a valid header value
    RequestId(
        HeaderValue::from_str(&generated)
            .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    )
}

fn is_acceptable(value: &HeaderValue) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_REQUEST_ID_LEN
        && bytes.iter().all(|b| b.is_ascii_graphic())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_existing_request_id() {
        let req = Request::builder()
            .header("x-request-id", "existing-id-123")
            .body(Body::empty())
            .unwrap();

        assert_eq!(extract_or_generate_request_id(&req).as_str(), "existing-id-123");
    }

    #[test]
    fn test_generate_new_request_id() {
        let req = Request::builder().body(Body::empty()).unwrap();

        let id = extract_or_generate_request_id(&req);
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_oversized_request_id_replaced() {
        let long = "a".repeat(MAX_REQUEST_ID_LEN + 1);
        let req = Request::builder()
            .header("x-request-id", long.as_str())
            .body(Body::empty())
            .unwrap();

        let id = extract_or_generate_request_id(&req);
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_request_id_with_spaces_replaced() {
        let req = Request::builder()
            .header("x-request-id", "has spaces")
            .body(Body::empty())
            .unwrap();

        let id = extract_or_generate_request_id(&req);
        assert_ne!(id.as_str(), "has spaces");
    }

    #[test]
    fn test_empty_request_id_replaced() {
        let req = Request::builder()
            .header("x-request-id", "")
            .body(Body::empty())
            .unwrap();

        assert!(Uuid::parse_str(extract_or_generate_request_id(&req).as_str()).is_ok());
    }
}
