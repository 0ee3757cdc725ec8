// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain HTTP handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::state::GateState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_connections: u64,
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<GateState>>) -> impl IntoResponse {
    Json(HealthResponse { status: "running".to_owned(), active_connections: s.active_connections() })
}

/// `GET /api/ping`
pub async fn api_ping() -> String {
    ping_message(Local::now())
}

/// `[Wednesday, October 14, 2026] - Pong!`
pub fn ping_message<Tz: TimeZone>(at: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("[{}] - Pong!", at.format("%A, %B %-d, %Y"))
}
