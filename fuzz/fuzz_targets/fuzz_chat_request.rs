//! Fuzz the inbound parsing surface.
//!
//! Everything a client controls before the backend is contacted:
//!
//! - the `POST /chat` body, including the sanitized 400 it may produce
//! - forwarding headers read when the peer is a trusted proxy
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_chat_request -- -max_total_time=60
//! ```

#![no_main]

use std::net::{IpAddr, SocketAddr};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request};
use axum::response::IntoResponse;
use chat_proxy::AppError;
use chat_proxy::middleware::{TrustedProxyConfig, client_address};
use chat_proxy::models::ChatRequest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Err(e) = ChatRequest::parse(data) {
        let response = AppError::MalformedRequest(e).into_response();
        assert_eq!(response.status(), 400);
    }

    if let Ok(value) = HeaderValue::from_bytes(data) {
        let peer = SocketAddr::from(([10, 0, 0, 1], 443));
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);

        let mut builder = Request::builder().extension(ConnectInfo(peer));
        builder = builder
            .header("x-forwarded-for", value.clone())
            .header("x-real-ip", value);
        if let Ok(req) = builder.body(Body::empty()) {
            let key = client_address(&req, &trusted);
            assert!(key.parse::<IpAddr>().is_ok());
        }
    }
});
