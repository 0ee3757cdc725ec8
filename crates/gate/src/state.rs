// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{KeyDiscovery, KeySource, TokenValidator};
use crate::config::GateConfig;

/// Shared gateway state. Nothing in here is per-connection.
pub struct GateState {
    pub config: GateConfig,
    pub validator: TokenValidator,
    /// Root of every connection's cancellation signal.
    pub shutdown: CancellationToken,
    active_connections: AtomicU64,
}

impl GateState {
    pub fn new(config: GateConfig, keys: Arc<dyn KeySource>, shutdown: CancellationToken) -> Self {
        let params = Arc::new(config.validation_parameters());
        Self {
            validator: TokenValidator::new(params, keys),
            config,
            shutdown,
            active_connections: AtomicU64::new(0),
        }
    }

    /// Build state backed by live discovery against `config.discovery_url`.
    pub fn from_config(config: GateConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let discovery = KeyDiscovery::from_config(&config)?;
        Ok(Self::new(config, Arc::new(discovery), shutdown))
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Count a connection for as long as the returned guard lives.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard { state: Arc::clone(self) }
    }
}

pub struct ConnectionGuard {
    state: Arc<GateState>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}
