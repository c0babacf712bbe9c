//! Per-client admission control middleware.
//!
//! # Algorithm
//!
//! Delegates to a [`KeyedLimiter`] (by default the rolling-window
//! [`SlidingWindowLimiter`](super::sliding_window::SlidingWindowLimiter)),
//! keyed by the client address resolved in [`super::ip`].
//!
//! # Placement
//!
//! This layer sits inside authentication, so only requests carrying a valid
//! frontend secret consume quota. A client with a wrong secret always sees
//! 403, never 429.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the next request will be accepted
//! - `X-RateLimit-Limit`: Configured requests per window
//! - `X-RateLimit-Remaining`: Always `0`
//!
//! # IP Spoofing Mitigation
//!
//! Forwarding headers are ignored unless the TCP peer falls inside one of the
//! `TRUSTED_PROXIES` ranges; see [`super::ip`].

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::client_address;
use super::sliding_window::KeyedLimiter;
use crate::error::AppError;
use crate::metrics;

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Requests per window cannot be zero.
    ZeroLimit,
    /// Window length cannot be zero.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroLimit => write!(
                f,
                "request limit must be greater than 0; omit the layer for no limiting"
            ),
            RateLimitError::ZeroWindow => write!(f, "rate limit window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    /// Network address
    network: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as a single-host range. Returns `None` if the
    /// format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();

        let Some((addr, prefix)) = cidr.split_once('/') else {
            let ip: IpAddr = cidr.parse().ok()?;
            return Some(Self {
                network: ip,
                prefix_len: max_prefix(&ip),
            });
        };

        let ip: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;

        if prefix_len > max_prefix(&ip) {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

fn max_prefix(ip: &IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Reverse proxies whose forwarding headers identify the real client.
///
/// Empty by default, in which case the TCP peer address is always the key.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Create a new trusted proxy configuration from CIDR strings.
    ///
    /// Invalid CIDR strings are logged as warnings and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    /// Check if any trusted ranges are configured.
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Check if a peer address belongs to a trusted proxy.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(SlidingWindowLimiter::new(5, Duration::from_secs(60))?);
/// let app = Router::new()
///     .route("/chat", post(handler))
///     .layer(RateLimitLayer::new(limiter, TrustedProxyConfig::default()));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<dyn KeyedLimiter>,
    /// Window description for the 429 body, e.g. "1 minute"
    window_desc: Arc<str>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    /// Wrap an existing limiter.
    pub fn new(limiter: Arc<dyn KeyedLimiter>, trusted_proxies: TrustedProxyConfig) -> Self {
        let window_desc = crate::config::describe_window(limiter.window());
        Self {
            limiter,
            window_desc: Arc::from(window_desc),
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            window_desc: self.window_desc.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<dyn KeyedLimiter>,
    window_desc: Arc<str>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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
        let client_ip = client_address(&req, &self.trusted_proxies).into_owned();

        let verdict = self.limiter.check_key(&client_ip);
        let limit = self.limiter.limit();
        let window_desc = self.window_desc.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match verdict {
                Ok(()) => inner.call(req).await,
                Err(rejected) => {
                    warn!(
                        client_ip = %client_ip,
                        path = %req.uri().path(),
                        retry_after_secs = rejected.retry_after.as_secs(),
                        "Rate limit exceeded for client"
                    );
                    metrics::record_rate_limited();

                    Ok(AppError::RateLimitExceeded {
                        limit,
                        window_desc: window_desc.to_string(),
                        retry_after: rejected.retry_after,
                    }
                    .into_response())
                }
            }
        })
    }
}
