//! Prometheus metrics for the proxy.
//!
//! Metrics are exposed on a dedicated listener when `METRICS_PORT` is set,
//! never on the public router.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `chat_proxy_requests_total` - Chat requests by outcome (`relayed`, or an error kind)
//! - `chat_proxy_auth_failures_total` - Requests rejected for a bad frontend secret
//! - `chat_proxy_rate_limited_total` - Requests rejected by admission control
//! - `chat_proxy_upstream_failures_total` - Backend calls that produced no usable response (label: kind)
//!
//! ## Histograms
//! - `chat_proxy_upstream_duration_seconds` - Backend round trip (label: status)
//!
//! ## Gauges
//! - `chat_proxy_tracked_clients` - Client addresses currently held by the rate limiter
//!
//! # Usage
//!
//! ```rust,ignore
//! use chat_proxy::metrics::{try_init_metrics, record_request};
//!
//! try_init_metrics("0.0.0.0:9090".parse()?);
//! record_request("relayed");
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "chat_proxy_requests_total";
    pub const AUTH_FAILURES_TOTAL: &str = "chat_proxy_auth_failures_total";
    pub const RATE_LIMITED_TOTAL: &str = "chat_proxy_rate_limited_total";
    pub const UPSTREAM_FAILURES_TOTAL: &str = "chat_proxy_upstream_failures_total";
    pub const UPSTREAM_DURATION_SECONDS: &str = "chat_proxy_upstream_duration_seconds";
    pub const TRACKED_CLIENTS: &str = "chat_proxy_tracked_clients";
}

/// Install the Prometheus exporter and describe every metric.
///
/// # Errors
///
/// Fails if a global recorder is already installed or the listener cannot bind.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_TOTAL,
        "Chat requests that reached the handler, by outcome"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Requests rejected for a missing or invalid frontend secret"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests rejected because the client exhausted its quota"
    );
    describe_counter!(
        names::UPSTREAM_FAILURES_TOTAL,
        "Backend calls that failed, timed out or returned a non-JSON body"
    );

    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Chat backend round trip in seconds"
    );

    describe_gauge!(
        names::TRACKED_CLIENTS,
        "Client addresses currently tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record the outcome of a chat request that passed auth and admission.
pub fn record_request(outcome: &'static str) {
    counter!(names::REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_auth_failure() {
    counter!(names::AUTH_FAILURES_TOTAL).increment(1);
}

pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

pub fn record_upstream_failure(kind: &'static str) {
    counter!(names::UPSTREAM_FAILURES_TOTAL, "kind" => kind).increment(1);
}

/// Record a completed backend round trip.
pub fn record_upstream_duration(status: u16, duration_secs: f64) {
    histogram!(names::UPSTREAM_DURATION_SECONDS, "status" => status.to_string())
        .record(duration_secs);
}

/// Update the rate limiter size gauge.
pub fn set_tracked_clients(count: usize) {
    // Precision loss above 2^53 clients is irrelevant
    #[allow(clippy::cast_precision_loss)]
    gauge!(names::TRACKED_CLIENTS).set(count as f64);
}
