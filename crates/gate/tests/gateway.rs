// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests: a real listener, a local identity provider, and
//! WebSocket clients over TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;

use wsgate::state::GateState;
use wsgate::test_support::{
    now_secs, spawn_gate_server, test_config, valid_claims, MockIdentityProvider, KEY_A, KEY_B,
};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Gateway {
    addr: SocketAddr,
    state: Arc<GateState>,
    idp: MockIdentityProvider,
}

async fn start_gateway() -> anyhow::Result<Gateway> {
    let idp = MockIdentityProvider::start(&[&KEY_A]).await?;
    let config = test_config(&idp.discovery_url());
    let state = Arc::new(GateState::from_config(config, CancellationToken::new())?);
    let (addr, _handle) = spawn_gate_server(Arc::clone(&state)).await?;
    Ok(Gateway { addr, state, idp })
}

async fn connect(addr: &SocketAddr, path_and_query: &str) -> Result<WsStream, tungstenite::Error> {
    let url = format!("ws://{addr}{path_and_query}");
    tokio_tungstenite::connect_async(&url).await.map(|(stream, _)| stream)
}

/// HTTP status of a refused handshake.
async fn refused_status(addr: &SocketAddr, path_and_query: &str) -> anyhow::Result<u16> {
    match connect(addr, path_and_query).await {
        Err(tungstenite::Error::Http(resp)) => Ok(resp.status().as_u16()),
        Err(e) => anyhow::bail!("unexpected handshake error: {e}"),
        Ok(_) => anyhow::bail!("handshake unexpectedly succeeded for {path_and_query}"),
    }
}

async fn recv_text(ws: &mut WsStream) -> anyhow::Result<String> {
    let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
        .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
        .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;
    match msg {
        WsMessage::Text(text) => Ok(text.as_str().to_owned()),
        other => anyhow::bail!("expected Text message, got {other:?}"),
    }
}

async fn wait_for_connections(state: &GateState, expected: u64) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while state.active_connections() != expected {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("active_connections stuck at {}", state.active_connections());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::test]
async fn clock_streams_timestamps_to_an_authenticated_client() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let token = KEY_A.sign(&valid_claims())?;

    let mut ws = connect(&gw.addr, &format!("/clock?bearer_token={token}")).await?;
    for _ in 0..3 {
        let frame = recv_text(&mut ws).await?;
        let stamp = frame
            .strip_suffix(" UTC")
            .ok_or_else(|| anyhow::anyhow!("missing UTC suffix: {frame}"))?;
        chrono::NaiveDateTime::parse_from_str(stamp, "%b %d %Y %H:%M:%S%.3f")?;
    }
    assert_eq!(gw.state.active_connections(), 1);
    Ok(())
}

#[tokio::test]
async fn ping_streams_pong() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let token = KEY_A.sign(&valid_claims())?;

    let mut ws = connect(&gw.addr, &format!("/ping?BEARER_TOKEN={token}")).await?;
    assert_eq!(recv_text(&mut ws).await?, "Pong!");
    assert_eq!(recv_text(&mut ws).await?, "Pong!");
    Ok(())
}

#[tokio::test]
async fn every_upgrade_fetches_the_key_set() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let token = KEY_A.sign(&valid_claims())?;

    let _a = connect(&gw.addr, &format!("/ping?bearer_token={token}")).await?;
    let _b = connect(&gw.addr, &format!("/clock?bearer_token={token}")).await?;
    assert_eq!(gw.idp.jwks_fetches(), 2);
    Ok(())
}

#[tokio::test]
async fn rotated_keys_take_effect_on_the_next_upgrade() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let old = KEY_A.sign(&valid_claims())?;
    let new = KEY_B.sign(&valid_claims())?;

    assert_eq!(refused_status(&gw.addr, &format!("/ping?bearer_token={new}")).await?, 401);
    gw.idp.set_keys(&[&KEY_B]).await;
    connect(&gw.addr, &format!("/ping?bearer_token={new}")).await?;
    assert_eq!(refused_status(&gw.addr, &format!("/ping?bearer_token={old}")).await?, 401);
    Ok(())
}

#[tokio::test]
async fn missing_or_malformed_credentials_are_401() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let mut expired = valid_claims();
    expired["exp"] = json!(now_secs() - 5);
    let expired = KEY_A.sign(&expired)?;

    for target in [
        "/clock".to_owned(),
        "/ping?".to_owned(),
        "/clock?token=abc".to_owned(),
        "/clock?bearer_token=".to_owned(),
        "/clock?bearer_token=not-a-jwt".to_owned(),
        format!("/ping?bearer_token={expired}"),
    ] {
        assert_eq!(refused_status(&gw.addr, &target).await?, 401, "target {target}");
    }
    assert_eq!(gw.state.active_connections(), 0);
    Ok(())
}

#[tokio::test]
async fn discovery_outage_is_503() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let token = KEY_A.sign(&valid_claims())?;

    gw.idp.set_failing(true);
    assert_eq!(refused_status(&gw.addr, &format!("/clock?bearer_token={token}")).await?, 503);

    gw.idp.set_failing(false);
    connect(&gw.addr, &format!("/clock?bearer_token={token}")).await?;
    Ok(())
}

#[tokio::test]
async fn client_close_ends_the_connection() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let token = KEY_A.sign(&valid_claims())?;

    let mut ws = connect(&gw.addr, &format!("/clock?bearer_token={token}")).await?;
    recv_text(&mut ws).await?;
    wait_for_connections(&gw.state, 1).await?;

    ws.close(None).await?;
    wait_for_connections(&gw.state, 0).await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_open_streams() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let token = KEY_A.sign(&valid_claims())?;

    let mut clock = connect(&gw.addr, &format!("/clock?bearer_token={token}")).await?;
    let mut ping = connect(&gw.addr, &format!("/ping?bearer_token={token}")).await?;
    recv_text(&mut clock).await?;
    recv_text(&mut ping).await?;

    gw.state.shutdown.cancel();

    for ws in [&mut clock, &mut ping] {
        // Drain until the server's close frame or end of stream.
        let closed = tokio::time::timeout(RECV_TIMEOUT, async {
            while let Some(msg) = ws.next().await {
                if matches!(msg, Ok(WsMessage::Close(_)) | Err(_)) {
                    break;
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "stream was not closed after shutdown");
    }
    wait_for_connections(&gw.state, 0).await?;
    Ok(())
}

#[tokio::test]
async fn health_is_served_without_a_token() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let body: serde_json::Value =
        reqwest::get(format!("http://{}/api/v1/health", gw.addr)).await?.json().await?;
    assert_eq!(body["status"], "running");
    assert_eq!(body["active_connections"], 0);
    Ok(())
}

#[tokio::test]
async fn api_ping_uses_the_authorization_header() -> anyhow::Result<()> {
    let gw = start_gateway().await?;
    let token = KEY_A.sign(&valid_claims())?;
    let client = reqwest::Client::new();
    let url = format!("http://{}/api/ping", gw.addr);

    let anonymous = client.get(&url).send().await?;
    assert_eq!(anonymous.status().as_u16(), 401);

    let authorized = client.get(&url).bearer_auth(&token).send().await?;
    assert_eq!(authorized.status().as_u16(), 200);
    assert!(authorized.text().await?.ends_with("] - Pong!"));
    Ok(())
}
