//! Chat relay handler.
//!
//! # Endpoint
//!
//! - `POST /chat` - Forward a conversation to the chat backend
//!
//! # Request Body
//!
//! ```json
//! {
//!   "messages": [
//!     { "role": "system", "content": "You are helpful." },
//!     { "role": "user", "content": "Hi" }
//!   ]
//! }
//! ```
//!
//! The body is checked against this shape and then forwarded byte for byte;
//! the backend's status and JSON body come back unchanged.

use axum::Extension;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HeaderValue};
use axum::response::Response;
use tracing::{debug, instrument};

use crate::error::AppResult;
use crate::metrics;
use crate::middleware::RequestId;
use crate::models::ChatRequest;
use crate::state::AppState;

/// Relay a chat request to the backend.
///
/// Authentication and admission have already run as middleware.
#[instrument(skip_all, fields(body_bytes = body.len()))]
pub async fn chat(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> AppResult<Response> {
    let result = relay(&state, request_id.as_ref().map(|Extension(id)| id), body).await;
    metrics::record_request(match &result {
        Ok(_) => "relayed",
        Err(e) => e.kind(),
    });
    result
}

async fn relay(
    state: &AppState,
    request_id: Option<&RequestId>,
    body: Bytes,
) -> AppResult<Response> {
    let request = ChatRequest::parse(&body)?;
    debug!(messages = request.messages.len(), "Forwarding chat request");

    let upstream = state.upstream.forward(body, request_id).await?;

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}
