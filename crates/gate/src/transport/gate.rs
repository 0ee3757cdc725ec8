// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upgrade gate: authenticates WebSocket upgrade requests before the
//! handshake and lets every other request through untouched.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::{AuthFailure, DiscoveryError, TokenValidator, ValidateError, ValidatedToken};
use crate::error::GateError;
use crate::state::GateState;

/// What the gate does with one request.
#[derive(Debug)]
pub enum GateDecision {
    /// Not a WebSocket upgrade; hand to the next handler unchanged.
    PassThrough,
    /// Token validated; proceed with the handshake.
    Upgrade(ValidatedToken),
    Reject(Rejection),
}

#[derive(Debug)]
pub enum Rejection {
    /// Upgrade request with no query string at all. The validator is not called.
    MissingQuery,
    Unauthenticated(AuthFailure),
    DiscoveryUnavailable(DiscoveryError),
}

impl Rejection {
    pub fn error(&self) -> GateError {
        match self {
            Self::MissingQuery | Self::Unauthenticated(_) => GateError::Unauthorized,
            Self::DiscoveryUnavailable(_) => GateError::DiscoveryUnavailable,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingQuery => "missing_query",
            Self::Unauthenticated(f) => f.kind(),
            Self::DiscoveryUnavailable(_) => "discovery_unavailable",
        }
    }
}

/// True when the headers ask for a WebSocket upgrade.
///
/// `Connection` is a token list (`keep-alive, Upgrade` is common); both
/// headers compare case-insensitively.
pub fn is_websocket_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers.get_all(header::CONNECTION).iter().any(|v| {
        v.to_str()
            .map(|s| s.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false)
    });
    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
    connection_upgrade && upgrade_websocket
}

/// Decide one request. `query` is the raw query without its leading `?`.
pub async fn decide(
    validator: &TokenValidator,
    headers: &HeaderMap,
    query: Option<&str>,
) -> GateDecision {
    if !is_websocket_request(headers) {
        return GateDecision::PassThrough;
    }

    let query = match query {
        Some(q) if !q.is_empty() => q,
        _ => return GateDecision::Reject(Rejection::MissingQuery),
    };

    match validator.validate(&format!("?{query}")).await {
        Ok(token) => GateDecision::Upgrade(token),
        Err(ValidateError::Unauthenticated(f)) => GateDecision::Reject(Rejection::Unauthenticated(f)),
        Err(ValidateError::Discovery(e)) => GateDecision::Reject(Rejection::DiscoveryUnavailable(e)),
    }
}

/// Middleware for routes that accept authenticated WebSocket upgrades.
///
/// On success the [`ValidatedToken`] rides along in request extensions; the
/// WebSocket handlers require it, so nothing upgrades without validation.
pub async fn upgrade_gate(State(state): State<Arc<GateState>>, req: Request, next: Next) -> Response {
    // The body is not `Sync`; only the head is borrowed across validation.
    let (mut parts, body) = req.into_parts();
    let decision = decide(&state.validator, &parts.headers, parts.uri.query()).await;

    match decision {
        GateDecision::PassThrough => next.run(Request::from_parts(parts, body)).await,
        GateDecision::Upgrade(token) => {
            parts.extensions.insert(token);
            next.run(Request::from_parts(parts, body)).await
        }
        GateDecision::Reject(rejection) => {
            let path = parts.uri.path();
            match rejection {
                Rejection::DiscoveryUnavailable(ref e) => {
                    tracing::error!(path, err = %e, "signing key discovery failed");
                }
                Rejection::Unauthenticated(ref f) => {
                    tracing::warn!(path, kind = rejection.kind(), err = %f, "websocket upgrade rejected");
                }
                Rejection::MissingQuery => {
                    tracing::warn!(path, kind = rejection.kind(), "websocket upgrade rejected");
                }
            }
            rejection.error().into_response()
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
