// src/core/handler/router.rs

//! Builds the request router shared by every connection.

use super::query::handle_query;
use crate::core::GatewayError;
use crate::core::state::GatewayState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use std::sync::Arc;

const PING_PATH: &str = "/ping";

/// Returns the router for the gateway.
///
/// `/` is the query endpoint. `/ping` and everything below it answer `OK`.
/// Any other path is `404 Not Found`. The router expects a
/// `ConnectionIdentity` extension to be attached by the connection handler.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let max_query_size = state.config.output.max_query_size;
    Router::new()
        .route("/", any(handle_query))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(max_query_size))
        .with_state(state)
}

async fn fallback(uri: Uri) -> Response {
    if is_ping(uri.path()) {
        (StatusCode::OK, "OK\r\n").into_response()
    } else {
        GatewayError::NotFound.into_response()
    }
}

fn is_ping(path: &str) -> bool {
    path == PING_PATH
        || path
            .strip_prefix(PING_PATH)
            .is_some_and(|rest| rest.starts_with('/'))
}
