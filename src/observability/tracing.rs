//! Request spans with correlation IDs.
//!
//! Every HTTP request and WebSocket upgrade gets an `x-request-id` (see
//! `http::request`). The span built here carries it so log lines emitted
//! by handlers and the socket tasks they spawn can be correlated.

use axum::http::Request;
use tracing::Span;

use crate::http::request::X_REQUEST_ID;

/// `make_span_with` callback for `TraceLayer`.
pub fn request_span<B>(request: &Request<B>) -> Span {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    )
}
