// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP and WebSocket routing.

pub mod auth;
pub mod gate;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::GateState;

/// Build the axum `Router` with all routes.
pub fn build_router(state: Arc<GateState>) -> Router {
    let streams = Router::new()
        .route("/clock", get(ws::clock_handler))
        .route("/ping", get(ws::ping_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), gate::upgrade_gate));

    let api = Router::new()
        .route("/api/ping", get(http::api_ping))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer));

    Router::new()
        .route("/api/v1/health", get(http::health))
        .merge(streams)
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
