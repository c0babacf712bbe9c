//! Client address resolution for admission control.
//!
//! The rate limiter keys on the address of the client that sent the request.
//! By default this is the TCP peer address recorded by axum's
//! [`ConnectInfo`] (the server must be started with
//! `into_make_service_with_connect_info::<SocketAddr>()`).
//!
//! # Behind a Reverse Proxy
//!
//! When the service sits behind a load balancer, every request arrives from
//! the balancer's address. Configure `TRUSTED_PROXIES` with its CIDR ranges
//! and the client address is then taken from, in order:
//!
//! 1. `X-Forwarded-For` (first entry)
//! 2. `X-Real-IP`
//!
//! A header value only counts if it parses as an IP address; anything else is
//! skipped, so a trusted proxy relaying junk cannot mint arbitrary keys.
//!
//! Forwarding headers from peers outside those ranges are ignored, so a
//! directly connected client cannot rotate spoofed addresses to dodge its quota.
//!
//! # The "unknown" Fallback
//!
//! Requests with no resolvable address (no `ConnectInfo`, e.g. when the router
//! is driven in-process) share the [`UNKNOWN_IP`] key.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::debug;

use super::rate_limit::TrustedProxyConfig;

/// Fallback key when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Where a forwarded client address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardedIp {
    /// First entry of X-Forwarded-For.
    FromXff(IpAddr),
    /// X-Real-IP header.
    FromRealIp(IpAddr),
    NotFound,
}

/// Parse a header value as a single IP address.
fn header_ip<B>(req: &Request<B>, name: &str) -> Option<IpAddr> {
    let value = req.headers().get(name)?.to_str().ok()?;
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    value.split(',').next()?.trim().parse().ok()
}

/// Read a client address from forwarding headers.
#[inline]
fn forwarded_ip<B>(req: &Request<B>) -> ForwardedIp {
    if let Some(ip) = header_ip(req, "x-forwarded-for") {
        return ForwardedIp::FromXff(ip);
    }
    if let Some(ip) = header_ip(req, "x-real-ip") {
        return ForwardedIp::FromRealIp(ip);
    }
    ForwardedIp::NotFound
}

/// TCP peer address recorded by the server, if any.
#[inline]
pub fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Resolve the rate-limit key for a request.
///
/// # Returns
///
/// `Cow<'static, str>` - Borrowed for "unknown" (no allocation), owned otherwise.
pub fn client_address<B>(
    req: &Request<B>,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    let Some(peer) = peer_addr(req) else {
        return Cow::Borrowed(UNKNOWN_IP);
    };
    let peer_ip = peer.ip();

    if trusted_proxies.is_trusted(&peer_ip) {
        match forwarded_ip(req) {
            ForwardedIp::FromXff(ip) | ForwardedIp::FromRealIp(ip) => {
                return Cow::Owned(ip.to_string());
            }
            ForwardedIp::NotFound => {
                debug!(
                    peer = %peer_ip,
                    "Trusted proxy sent no usable forwarding header, using peer address"
                );
            }
        }
    } else if trusted_proxies.is_enabled() && forwarded_ip(req) != ForwardedIp::NotFound {
        debug!(peer = %peer_ip, "Ignoring forwarding headers from untrusted peer");
    }

    Cow::Owned(peer_ip.to_string())
}
