//! Routing table.
//!
//! There is one handler and it matches everything: it is registered on `/` and
//! as the fallback, so every method on every path gets the same response. New
//! routes can be merged in ahead of the fallback without touching the handler.
//!
//! Request tracing wraps the whole table via middleware that opens a span with
//! a unique request ID for each request.

pub mod upstream;

use axum::{middleware, routing::any, Router};

use crate::middleware::request_id_layer;

/// Creates the Axum router serving the fixed response.
pub fn create_router() -> Router {
    Router::new()
        .route("/", any(upstream::ok))
        .fallback(upstream::ok)
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}
