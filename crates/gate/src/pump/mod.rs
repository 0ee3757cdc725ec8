// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Duplex pump: one receive loop and one send loop per connection, bound to
//! a single cancellation signal and joined before the connection finalizes.

pub mod payload;

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

pub use payload::{ClockPayload, PayloadSource, PingPayload};

/// Upper bound on the closing handshake once both loops have exited.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

/// Connection state shared by both loops. Only moves forward.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.get() == ConnectionState::Open
    }

    /// Move to `next` unless the connection is already further along.
    pub fn advance(&self, next: ConnectionState) {
        self.0.fetch_max(next as u8, Ordering::AcqRel);
    }
}

/// Why the pump stopped. Ordered by precedence when the two loops disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CloseReason {
    /// Request abort or process shutdown.
    Cancelled,
    /// Close frame or clean end of stream from the peer.
    PeerClosed,
    /// Send or receive failed.
    TransportError,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::PeerClosed => "peer_closed",
            Self::TransportError => "transport_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpOutcome {
    pub frames_sent: u64,
    pub reason: CloseReason,
}

/// One accepted WebSocket: both directions, its state, and its cancellation signal.
pub struct Connection<Tx, Rx> {
    id: String,
    tx: Tx,
    rx: Rx,
    state: Arc<StateCell>,
    cancel: CancellationToken,
}

impl<Tx, Rx> Connection<Tx, Rx> {
    pub fn new(id: impl Into<String>, tx: Tx, rx: Rx, cancel: CancellationToken) -> Self {
        Self { id: id.into(), tx, rx, state: Arc::new(StateCell::default()), cancel }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> Arc<StateCell> {
        Arc::clone(&self.state)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<S> Connection<SplitSink<S, Message>, SplitStream<S>>
where
    S: Stream + Sink<Message>,
{
    /// Split a duplex socket into the halves the two loops own.
    pub fn from_socket(id: impl Into<String>, socket: S, cancel: CancellationToken) -> Self {
        let (tx, rx) = socket.split();
        Self::new(id, tx, rx, cancel)
    }
}

/// Run both loops until the connection closes or is cancelled.
///
/// Returns only after both loops have exited; either loop exiting cancels the
/// other. The sink is closed afterwards unless the transport already failed.
pub async fn run<Tx, Rx, E, P>(conn: Connection<Tx, Rx>, mut source: P) -> PumpOutcome
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    P: PayloadSource,
{
    let Connection { id, mut tx, mut rx, state, cancel } = conn;

    let ((send_exit, frames_sent), recv_exit) = tokio::join!(
        send_loop(&id, &mut tx, &mut source, &state, &cancel),
        receive_loop(&id, &mut rx, &state, &cancel),
    );
    let reason = send_exit.max(recv_exit);

    if state.get() != ConnectionState::Closed {
        state.advance(ConnectionState::Closing);
        match tokio::time::timeout(CLOSE_TIMEOUT, tx.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(conn_id = %id, err = %e, "websocket close failed"),
            Err(_) => tracing::debug!(conn_id = %id, "websocket close timed out"),
        }
    }
    state.advance(ConnectionState::Closed);

    tracing::info!(
        conn_id = %id,
        payload = source.name(),
        frames_sent,
        reason = reason.as_str(),
        "connection finished"
    );
    PumpOutcome { frames_sent, reason }
}

async fn send_loop<Tx, P>(
    id: &str,
    tx: &mut Tx,
    source: &mut P,
    state: &StateCell,
    cancel: &CancellationToken,
) -> (CloseReason, u64)
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    P: PayloadSource,
{
    let cadence = source.cadence();
    let mut frames = 0u64;

    let reason = loop {
        if cancel.is_cancelled() {
            break CloseReason::Cancelled;
        }
        if !state.is_open() {
            break CloseReason::PeerClosed;
        }

        let payload = source.next_payload();
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseReason::Cancelled,
            r = tx.send(Message::Text(payload.into())) => r,
        };
        if let Err(e) = sent {
            tracing::warn!(conn_id = %id, err = %e, "websocket send failed");
            state.advance(ConnectionState::Closed);
            break CloseReason::TransportError;
        }
        frames += 1;

        if !state.is_open() {
            break CloseReason::PeerClosed;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseReason::Cancelled,
            _ = tokio::time::sleep(cadence) => {}
        }
    };

    cancel.cancel();
    (reason, frames)
}

/// Drains inbound frames without interpreting them. The transport only
/// notices a close or disconnect when something reads.
async fn receive_loop<Rx, E>(
    id: &str,
    rx: &mut Rx,
    state: &StateCell,
    cancel: &CancellationToken,
) -> CloseReason
where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let reason = loop {
        if cancel.is_cancelled() {
            break CloseReason::Cancelled;
        }

        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseReason::Cancelled,
            msg = rx.next() => msg,
        };

        match msg {
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(conn_id = %id, code = ?frame.map(|f| f.code), "peer sent close");
                state.advance(ConnectionState::Closing);
                break CloseReason::PeerClosed;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(conn_id = %id, err = %e, "websocket receive failed");
                state.advance(ConnectionState::Closed);
                break CloseReason::TransportError;
            }
            None => {
                tracing::debug!(conn_id = %id, "peer disconnected");
                state.advance(ConnectionState::Closed);
                break CloseReason::PeerClosed;
            }
        }

        if !state.is_open() {
            break CloseReason::PeerClosed;
        }
    };

    cancel.cancel();
    reason
}

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;
