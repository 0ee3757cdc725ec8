// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: key fixtures, token signing, a mock identity
//! provider, and server helpers.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::auth::{DiscoveryError, KeySource, SigningKeySet, ValidationParameters};
use crate::config::{GateConfig, DEFAULT_ISSUER};
use crate::state::GateState;

pub const TEST_ISSUER: &str = DEFAULT_ISSUER;
pub const TEST_AUDIENCE: &str = "wsgate-test-client";

/// An RSA signing key with its public JWK components.
pub struct TestKey {
    pub kid: &'static str,
    pub private_pem: &'static str,
    pub modulus: &'static str,
}

pub const KEY_A: TestKey = TestKey {
    kid: "test-key-a",
    private_pem: include_str!("../tests/fixtures/signing_key_a.pem"),
    modulus: "6lEDROYVFbe5Hdp43hU2iTEPq2H2IghY6Ath1UgYix8u_9hlngAhpJO_ff45ESrrr0ykIdNZDqa7YwRhJGksRJ-nDzGdKtbN5Fc41KtvO7KWSTEuKFMo1sDxrjulHL2zWGm43Iw_BQUM2h2RTEvpjmaO1aqnn_pENpCNXlLHqeKtLUTXW6FEgUfEiklmytEyR_IWRhMMloD4zWjCquG0hrVEwUUOyapIxgiIsKC-0_YUZh3RRGXDaHjXE6275s_lEt3rla0fJY6ShucSrVWlPQhsu_521koxTMTxw54bqraZdp66yLNpq5Wfijq5i3A4MpcYDI5NwRd-CgzKaB828w",
};

pub const KEY_B: TestKey = TestKey {
    kid: "test-key-b",
    private_pem: include_str!("../tests/fixtures/signing_key_b.pem"),
    modulus: "5Rnvn4VbLrBstpUyOXemg6kBw6i74pDOz1-gH2EQpS0OX_eRY36OYqsYBwRn989cylemi3XubyifBOAxZIyS3dbVT9_PIi5ZGtv4pXn5v3l8k2gIkIHmTbSDqsjZop9kz4a_0HQcEP_jIND48VU61LL9Egzh64-srpdQGoI0tgUqrMiLdSGhZ9_SP0A9PsmoOSer0xqXqUROqRSJRLbbxpHKry6wtcSyNdlzdARRZPeMBc9ty8DPKu3mKxBin8QrJG9g74vjI2e-SUCetx8J4iEYZ6Rdx6t8ARxrGBkc_HZRwq81Qci9v3y_rXBHrAvQfvqgvW0qSo2pwTFaZ1_Ygw",
};

impl TestKey {
    pub fn jwk_json(&self) -> Value {
        json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": self.kid,
            "n": self.modulus,
            "e": "AQAB",
        })
    }

    /// Sign `claims` with RS256, carrying this key's `kid`.
    pub fn sign(&self, claims: &Value) -> anyhow::Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.to_owned());
        self.sign_with_header(&header, claims)
    }

    /// Sign `claims` with RS256 and no `kid` in the header.
    pub fn sign_without_kid(&self, claims: &Value) -> anyhow::Result<String> {
        self.sign_with_header(&Header::new(Algorithm::RS256), claims)
    }

    fn sign_with_header(&self, header: &Header, claims: &Value) -> anyhow::Result<String> {
        let key = EncodingKey::from_rsa_pem(self.private_pem.as_bytes())?;
        Ok(jsonwebtoken::encode(header, claims, &key)?)
    }
}

pub fn jwks_json(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>() })
}

pub fn key_set(keys: &[&TestKey]) -> anyhow::Result<SigningKeySet> {
    let jwks: JwkSet = serde_json::from_value(jwks_json(keys))?;
    Ok(SigningKeySet::new(jwks, TEST_ISSUER, "memory://jwks"))
}

pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Claims that pass [`test_params`]: right issuer and audience, ten minutes left.
pub fn valid_claims() -> Value {
    let now = now_secs();
    json!({
        "iss": TEST_ISSUER,
        "aud": TEST_AUDIENCE,
        "sub": "12345",
        "iat": now,
        "exp": now + 600,
    })
}

pub fn test_params() -> ValidationParameters {
    ValidationParameters {
        issuer: TEST_ISSUER.to_owned(),
        audience: Some(TEST_AUDIENCE.to_owned()),
        validate_issuer: true,
        validate_audience: true,
        validate_lifetime: true,
        clock_skew: Duration::ZERO,
    }
}

/// Config pointed at a local identity provider, with short stream cadences.
pub fn test_config(discovery_url: &str) -> GateConfig {
    GateConfig::parse_from([
        "wsgate",
        "--port",
        "0",
        "--audience",
        TEST_AUDIENCE,
        "--discovery-url",
        discovery_url,
        "--allow-insecure-discovery",
        "--discovery-timeout-ms",
        "2000",
        "--clock-interval-ms",
        "50",
        "--ping-interval-ms",
        "120",
    ])
}

/// Key source serving a fixed snapshot and counting how often it is asked.
pub struct StaticKeys {
    keys: Option<Arc<SigningKeySet>>,
    fetches: AtomicU32,
}

impl StaticKeys {
    pub fn new(keys: SigningKeySet) -> Arc<Self> {
        Arc::new(Self { keys: Some(Arc::new(keys)), fetches: AtomicU32::new(0) })
    }

    /// A source whose every fetch fails as if the provider were down.
    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self { keys: None, fetches: AtomicU32::new(0) })
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl KeySource for StaticKeys {
    fn signing_keys(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<SigningKeySet>, DiscoveryError>> + Send + '_>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let result = match self.keys {
            Some(ref keys) => Ok(Arc::clone(keys)),
            None => Err(DiscoveryError::NoSigningKeys { url: "memory://jwks".to_owned() }),
        };
        Box::pin(async move { result })
    }
}

struct IdpState {
    base_url: String,
    jwks: RwLock<Value>,
    jwks_fetches: AtomicU32,
    failing: AtomicBool,
    malformed: AtomicBool,
}

/// Local identity provider serving an OpenID configuration and a JWKS.
pub struct MockIdentityProvider {
    pub addr: SocketAddr,
    state: Arc<IdpState>,
    handle: JoinHandle<()>,
}

impl MockIdentityProvider {
    pub async fn start(keys: &[&TestKey]) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(IdpState {
            base_url: format!("http://{addr}"),
            jwks: RwLock::new(jwks_json(keys)),
            jwks_fetches: AtomicU32::new(0),
            failing: AtomicBool::new(false),
            malformed: AtomicBool::new(false),
        });

        let router = Router::new()
            .route("/.well-known/openid-configuration", get(openid_configuration))
            .route("/jwks", get(jwks))
            .with_state(Arc::clone(&state));
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { addr, state, handle })
    }

    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.state.base_url)
    }

    /// Publish a new key set (key rotation).
    pub async fn set_keys(&self, keys: &[&TestKey]) {
        *self.state.jwks.write().await = jwks_json(keys);
    }

    /// Answer every discovery request with 500.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Answer discovery with a body that is not JSON.
    pub fn set_malformed(&self, malformed: bool) {
        self.state.malformed.store(malformed, Ordering::SeqCst);
    }

    pub fn jwks_fetches(&self) -> u32 {
        self.state.jwks_fetches.load(Ordering::SeqCst)
    }
}

impl Drop for MockIdentityProvider {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn openid_configuration(State(s): State<Arc<IdpState>>) -> Response {
    if s.failing.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if s.malformed.load(Ordering::SeqCst) {
        return "<html>maintenance</html>".into_response();
    }
    Json(json!({
        "issuer": TEST_ISSUER,
        "jwks_uri": format!("{}/jwks", s.base_url),
        "id_token_signing_alg_values_supported": ["RS256"],
    }))
    .into_response()
}

async fn jwks(State(s): State<Arc<IdpState>>) -> Response {
    s.jwks_fetches.fetch_add(1, Ordering::SeqCst);
    Json(s.jwks.read().await.clone()).into_response()
}

/// Spawn the gateway on a random port for integration testing.
///
/// Returns the bound address and a join handle for the server task.
pub async fn spawn_gate_server(
    state: Arc<GateState>,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let router = crate::transport::build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    let handle = tokio::spawn(async move {
        let _ =
            axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await;
    });
    Ok((addr, handle))
}

pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
