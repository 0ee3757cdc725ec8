// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::ValidateError;
use crate::error::GateError;
use crate::state::GateState;

/// Token from an `Authorization: Bearer <token>` header. The scheme is
/// case-insensitive.
pub fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn unauthorized() -> Response {
    let mut response = GateError::Unauthorized.into_response();
    response.headers_mut().insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

/// Middleware for plain HTTP routes that need a validated bearer header.
pub async fn require_bearer(State(state): State<Arc<GateState>>, mut req: Request, next: Next) -> Response {
    let Some(token) = bearer_from_headers(req.headers()).map(str::to_owned) else {
        tracing::warn!(path = req.uri().path(), kind = "missing_token", "request rejected");
        return unauthorized();
    };

    match state.validator.validate_token(&token).await {
        Ok(validated) => {
            req.extensions_mut().insert(validated);
            next.run(req).await
        }
        Err(ValidateError::Unauthenticated(f)) => {
            tracing::warn!(path = req.uri().path(), kind = f.kind(), err = %f, "request rejected");
            unauthorized()
        }
        Err(ValidateError::Discovery(e)) => {
            tracing::error!(path = req.uri().path(), err = %e, "signing key discovery failed");
            GateError::DiscoveryUnavailable.into_response()
        }
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
