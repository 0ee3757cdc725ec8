// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::{decide, is_websocket_request, GateDecision, Rejection};
use crate::auth::{AuthFailure, KeySource, TokenValidator};
use crate::error::{ErrorResponse, GateError};
use crate::state::GateState;
use crate::test_support::{key_set, test_config, test_params, valid_claims, StaticKeys, KEY_A};
use crate::transport::build_router;

fn upgrade_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers
}

fn validator(keys: Arc<StaticKeys>) -> TokenValidator {
    TokenValidator::new(Arc::new(test_params()), keys)
}

fn gate_state(keys: Arc<dyn KeySource>) -> Arc<GateState> {
    let config = test_config("http://127.0.0.1:9/.well-known/openid-configuration");
    Arc::new(GateState::new(config, keys, CancellationToken::new()))
}

fn upgrade_request(uri: &str) -> anyhow::Result<Request<Body>> {
    Ok(Request::builder()
        .uri(uri)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_VERSION, "13")
        .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())?)
}

#[yare::parameterized(
    plain = { "upgrade", "websocket", true },
    mixed_case = { "Upgrade", "WebSocket", true },
    token_list = { "keep-alive, Upgrade", "websocket", true },
    keep_alive_only = { "keep-alive", "websocket", false },
    other_protocol = { "upgrade", "h2c", false },
)]
fn detects_upgrade_intent(connection: &'static str, upgrade: &'static str, expected: bool) {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONNECTION, HeaderValue::from_static(connection));
    headers.insert(header::UPGRADE, HeaderValue::from_static(upgrade));
    assert_eq!(is_websocket_request(&headers), expected);
}

#[test]
fn no_headers_is_not_an_upgrade() {
    assert!(!is_websocket_request(&HeaderMap::new()));
}

#[yare::parameterized(
    no_query = { None },
    empty_query = { Some("") },
    garbage_query = { Some("x=1&y=2") },
    bearer_query = { Some("bearer_token=abc") },
)]
#[test_macro(tokio::test)]
async fn non_upgrade_requests_pass_through(query: Option<&str>) {
    let keys = StaticKeys::new(key_set(&[&KEY_A]).unwrap());
    let decision = decide(&validator(Arc::clone(&keys)), &HeaderMap::new(), query).await;
    assert!(matches!(decision, GateDecision::PassThrough), "got {decision:?}");
    assert_eq!(keys.fetches(), 0);
}

#[yare::parameterized(
    absent = { None },
    empty = { Some("") },
)]
#[test_macro(tokio::test)]
async fn missing_query_rejects_without_validating(query: Option<&str>) {
    // An unavailable source would turn any validation attempt into a discovery error.
    let keys = StaticKeys::unavailable();
    let decision = decide(&validator(Arc::clone(&keys)), &upgrade_headers(), query).await;
    assert!(matches!(decision, GateDecision::Reject(Rejection::MissingQuery)), "got {decision:?}");
    assert_eq!(keys.fetches(), 0);
}

#[tokio::test]
async fn wrong_query_shape_goes_through_the_validator() -> anyhow::Result<()> {
    let keys = StaticKeys::new(key_set(&[&KEY_A])?);
    let decision = decide(&validator(keys), &upgrade_headers(), Some("token=abc")).await;

    match decision {
        GateDecision::Reject(ref r @ Rejection::Unauthenticated(AuthFailure::MissingToken)) => {
            assert_eq!(r.error(), GateError::Unauthorized);
            assert_eq!(r.kind(), "missing_token");
        }
        other => anyhow::bail!("unexpected decision {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn valid_token_upgrades() -> anyhow::Result<()> {
    let keys = StaticKeys::new(key_set(&[&KEY_A])?);
    let token = KEY_A.sign(&valid_claims())?;
    let query = format!("bearer_token={token}");

    match decide(&validator(keys), &upgrade_headers(), Some(&query)).await {
        GateDecision::Upgrade(validated) => assert_eq!(validated.subject.as_deref(), Some("12345")),
        other => anyhow::bail!("unexpected decision {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn discovery_failure_is_its_own_rejection() -> anyhow::Result<()> {
    let token = KEY_A.sign(&valid_claims())?;
    let query = format!("bearer_token={token}");

    match decide(&validator(StaticKeys::unavailable()), &upgrade_headers(), Some(&query)).await {
        GateDecision::Reject(r @ Rejection::DiscoveryUnavailable(_)) => {
            assert_eq!(r.error(), GateError::DiscoveryUnavailable);
        }
        other => anyhow::bail!("unexpected decision {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn rejected_upgrade_is_a_bare_401() -> anyhow::Result<()> {
    let app = build_router(gate_state(StaticKeys::new(key_set(&[&KEY_A])?)));

    for uri in ["/clock", "/ping", "/clock?bearer_token=garbage", "/ping?token=abc"] {
        let resp = app.clone().oneshot(upgrade_request(uri)?).await?;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "uri {uri}");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
        assert!(body.is_empty(), "uri {uri} body {body:?}");
    }
    Ok(())
}

#[tokio::test]
async fn discovery_outage_is_503_not_401() -> anyhow::Result<()> {
    let app = build_router(gate_state(StaticKeys::unavailable()));
    let token = KEY_A.sign(&valid_claims())?;

    let resp = app.oneshot(upgrade_request(&format!("/clock?bearer_token={token}"))?).await?;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await?;
    let parsed: ErrorResponse = serde_json::from_slice(&body)?;
    assert_eq!(parsed.error.code, "DISCOVERY_UNAVAILABLE");
    Ok(())
}

#[tokio::test]
async fn plain_request_reaches_the_handler() -> anyhow::Result<()> {
    let keys = StaticKeys::new(key_set(&[&KEY_A])?);
    let app = build_router(gate_state(keys.clone()));

    let req = Request::builder().uri("/clock?bearer_token=garbage").body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    // Past the gate; refused by the upgrade extractor rather than by auth.
    assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.status().is_client_error(), "status {}", resp.status());
    assert_eq!(keys.fetches(), 0);
    Ok(())
}
