// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket handlers. Both run behind [`super::gate::upgrade_gate`]; a
//! plain request that passes the gate is refused by the upgrade extractor.

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::Extension;

use crate::auth::ValidatedToken;
use crate::pump::{self, ClockPayload, Connection, PayloadSource, PingPayload};
use crate::state::GateState;

/// `GET /clock`: current UTC time on the clock cadence.
pub async fn clock_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GateState>>,
    Extension(token): Extension<ValidatedToken>,
) -> Response {
    let source = ClockPayload::new(state.config.clock_interval());
    accept(state, token, ws, source)
}

/// `GET /ping`: `Pong!` on the ping cadence.
pub async fn ping_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GateState>>,
    Extension(token): Extension<ValidatedToken>,
) -> Response {
    let source = PingPayload::new(state.config.ping_interval());
    accept(state, token, ws, source)
}

fn accept<P>(state: Arc<GateState>, token: ValidatedToken, ws: WebSocketUpgrade, source: P) -> Response
where
    P: PayloadSource + 'static,
{
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        conn_id = %conn_id,
        subject = token.subject.as_deref().unwrap_or(""),
        payload = source.name(),
        "websocket accepted"
    );

    ws.on_upgrade(move |socket| async move {
        let _guard = state.track_connection();
        let conn = Connection::from_socket(conn_id, socket, state.shutdown.child_token());
        pump::run(conn, source).await;
    })
}
