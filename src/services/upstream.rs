//! Outbound call to the chat backend.
//!
//! # Timeout Budgets
//!
//! | Budget  | Enforced by |
//! |---------|-------------|
//! | connect | `reqwest` connect timeout |
//! | read    | `reqwest` read timeout (per read, including the wait for headers) |
//! | write   | total deadline |
//! | pool    | total deadline |
//!
//! The total deadline is `pool + connect + write + read` and covers the whole
//! exchange, from connection checkout to the last response byte. `reqwest`
//! opens a new connection rather than queueing when no idle one is available,
//! so pool wait only ever shows up as connect time.
//!
//! # Response Size
//!
//! The backend body is read chunk by chunk and abandoned as soon as it passes
//! `MAX_RESPONSE_BODY_SIZE`, so an oversized reply never sits in memory whole.
//!
//! # Cancellation
//!
//! The exchange is a plain future. If the inbound client disconnects, axum
//! drops the handler and the outbound request is aborted with it.

use std::error::Error as _;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use axum::http::header::{CONTENT_TYPE, HeaderValue};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use serde::de::IgnoredAny;
use tracing::{debug, instrument};

use crate::config::{Config, UpstreamTimeouts, parse_backend_url};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::{REQUEST_ID_HEADER, RequestId};

/// Header carrying the backend credential.
pub const API_SECRET_HEADER: &str = "x-api-secret";

/// A complete, buffered backend response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    /// Raw body, already checked to be JSON.
    pub body: Bytes,
}

/// Client for the single configured chat backend.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: reqwest::Url,
    secret: Arc<HeaderValue>,
    timeouts: UpstreamTimeouts,
    max_response_bytes: usize,
}

impl UpstreamClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the backend URL or secret is unusable
    /// or the TLS backend cannot be initialised.
    pub fn new(config: &Config) -> AppResult<Self> {
        let url = parse_backend_url(&config.backend_url)?;

        let mut secret = HeaderValue::from_str(&config.backend_secret).map_err(|_| {
            AppError::ConfigError(
                "BACKEND_SECRET contains characters not allowed in an HTTP header".to_string(),
            )
        })?;
        secret.set_sensitive(true);

        let timeouts = config.upstream_timeouts;
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            url,
            secret: Arc::new(secret),
            timeouts,
            max_response_bytes: config.max_response_body_size,
        })
    }

    /// Backend endpoint requests are sent to.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    /// POST `body` to the backend and buffer its response.
    ///
    /// Only the backend secret, the content type and the request ID are sent;
    /// no inbound header is forwarded.
    ///
    /// # Errors
    ///
    /// - `UpstreamUnavailable` when the backend cannot be reached
    /// - `UpstreamTimeout` when a read or the total deadline runs out
    /// - `UpstreamProtocolError` when the backend body is not JSON or is
    ///   larger than `MAX_RESPONSE_BODY_SIZE`
    #[instrument(skip_all, fields(body_bytes = body.len()))]
    pub async fn forward(
        &self,
        body: Bytes,
        request_id: Option<&RequestId>,
    ) -> AppResult<UpstreamResponse> {
        let mut request = self
            .http
            .post(self.url.clone())
            .header(API_SECRET_HEADER, (*self.secret).clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body);
        if let Some(id) = request_id {
            request = request.header(REQUEST_ID_HEADER, id.header_value().clone());
        }

        let started = Instant::now();
        let limit = self.max_response_bytes;
        let exchange = async {
            let mut response = request.send().await.map_err(|e| classify(&e))?;
            let status = response.status();

            if let Some(declared) = response.content_length()
                && declared > limit as u64
            {
                return Err(too_large(status, limit));
            }

            let mut body = BytesMut::new();
            while let Some(chunk) = response.chunk().await.map_err(|e| classify(&e))? {
                if body.len() + chunk.len() > limit {
                    return Err(too_large(status, limit));
                }
                body.extend_from_slice(&chunk);
            }
            Ok((status, body.freeze()))
        };

        let deadline = self.timeouts.total();
        let (status, body) = match tokio::time::timeout(deadline, exchange).await {
            Ok(Ok(exchanged)) => exchanged,
            Ok(Err(err)) => {
                metrics::record_upstream_failure(err.kind());
                return Err(err);
            }
            Err(_) => {
                metrics::record_upstream_failure("upstream_timeout");
                return Err(AppError::UpstreamTimeout(format!(
                    "no complete response within {deadline:?}"
                )));
            }
        };

        let elapsed = started.elapsed();
        metrics::record_upstream_duration(status.as_u16(), elapsed.as_secs_f64());
        debug!(
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            response_bytes = body.len(),
            "Chat backend responded"
        );

        if serde_json::from_slice::<IgnoredAny>(&body).is_err() {
            metrics::record_upstream_failure("upstream_protocol_error");
            return Err(AppError::UpstreamProtocolError(format!(
                "status {status} with {} byte non-JSON body",
                body.len()
            )));
        }

        Ok(UpstreamResponse { status, body })
    }
}

fn too_large(status: StatusCode, limit: usize) -> AppError {
    AppError::UpstreamProtocolError(format!(
        "status {status} with a body over the {limit} byte limit"
    ))
}

/// Map a transport error onto the proxy's error kinds.
///
/// Connect timeouts count as unavailability, not slowness.
fn classify(e: &reqwest::Error) -> AppError {
    let detail = e.to_string();
    if e.is_connect() {
        AppError::UpstreamUnavailable(detail)
    } else if e.is_timeout() || caused_by_timeout(e) {
        AppError::UpstreamTimeout(detail)
    } else {
        AppError::UpstreamUnavailable(detail)
    }
}

/// Read timeouts surface as an `io::ErrorKind::TimedOut` somewhere in the
/// source chain rather than as a reqwest timeout.
fn caused_by_timeout(e: &reqwest::Error) -> bool {
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<io::Error>()
            && io.kind() == io::ErrorKind::TimedOut
        {
            return true;
        }
        source = err.source();
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_url() {
        let config = Config {
            backend_url: "backend:9000/chat".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            UpstreamClient::new(&config),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_new_rejects_unencodable_secret() {
        let config = Config {
            backend_secret: "line\nbreak".to_string(),
            ..Config::default()
        };
        let err = UpstreamClient::new(&config).err().unwrap();
        assert!(err.to_string().contains("BACKEND_SECRET"));
    }

    #[test]
    fn test_secret_is_marked_sensitive() {
        let client = UpstreamClient::new(&Config::default()).unwrap();
        assert!(client.secret.is_sensitive());
        assert!(!format!("{:?}", client.secret).contains("backend-secret"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = Config {
            backend_url: format!("http://127.0.0.1:{port}/chat"),
            ..Config::default()
        };

        let client = UpstreamClient::new(&config).unwrap();
        let err = client
            .forward(Bytes::from_static(br#"{"messages":[]}"#), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
    }

    /// Serve `reply` as a JSON body and return the backend URL.
    async fn backend_replying(reply: String) -> String {
        use axum::routing::post;

        let app = axum::Router::new().route(
            "/chat",
            post(move || async move { ([(CONTENT_TYPE, "application/json")], reply) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/chat")
    }

    #[tokio::test]
    async fn test_oversized_response_is_protocol_error() {
        let reply = format!(r#"{{"reply":"{}"}}"#, "x".repeat(1024));
        let config = Config {
            backend_url: backend_replying(reply).await,
            max_response_body_size: 256,
            ..Config::default()
        };

        let client = UpstreamClient::new(&config).unwrap();
        let err = client
            .forward(Bytes::from_static(br#"{"messages":[]}"#), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UpstreamProtocolError(_)));
    }

    #[tokio::test]
    async fn test_response_at_limit_is_relayed() {
        let reply = r#"{"reply":"ok"}"#.to_string();
        let config = Config {
            backend_url: backend_replying(reply.clone()).await,
            max_response_body_size: reply.len(),
            ..Config::default()
        };

        let client = UpstreamClient::new(&config).unwrap();
        let response = client
            .forward(Bytes::from_static(br#"{"messages":[]}"#), None)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, reply.as_bytes());
    }
}
