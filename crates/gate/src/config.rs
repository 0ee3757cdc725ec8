// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::ArgAction;

use crate::auth::ValidationParameters;

/// Twitch publishes its OpenID configuration here.
pub const DEFAULT_DISCOVERY_URL: &str = "https://api.twitch.tv/api/.well-known/openid-configuration";
pub const DEFAULT_ISSUER: &str = "https://api.twitch.tv/api";

/// Configuration for the wsgate server.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "wsgate", version, about = "Bearer-token gated WebSocket streams")]
pub struct GateConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "WSGATE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 5000, env = "WSGATE_PORT")]
    pub port: u16,

    /// OpenID discovery document listing the signing keys.
    #[arg(long, default_value = DEFAULT_DISCOVERY_URL, env = "WSGATE_DISCOVERY_URL")]
    pub discovery_url: String,

    /// Expected `iss` claim.
    #[arg(long, default_value = DEFAULT_ISSUER, env = "WSGATE_ISSUER")]
    pub issuer: String,

    /// Expected `aud` claim (the client id).
    #[arg(long, env = "WSGATE_AUDIENCE")]
    pub audience: Option<String>,

    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "WSGATE_VALIDATE_ISSUER")]
    pub validate_issuer: bool,

    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "WSGATE_VALIDATE_AUDIENCE")]
    pub validate_audience: bool,

    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "WSGATE_VALIDATE_LIFETIME")]
    pub validate_lifetime: bool,

    /// Clock skew tolerated on `exp`/`nbf`, in seconds.
    #[arg(long, default_value_t = 0, env = "WSGATE_CLOCK_SKEW_SECS")]
    pub clock_skew_secs: u64,

    /// Reuse fetched signing keys for this many seconds. 0 fetches on every validation.
    #[arg(long, default_value_t = 0, env = "WSGATE_DISCOVERY_TTL_SECS")]
    pub discovery_ttl_secs: u64,

    /// Per-request timeout for discovery fetches, in milliseconds.
    #[arg(long, default_value_t = 10000, env = "WSGATE_DISCOVERY_TIMEOUT_MS")]
    pub discovery_timeout_ms: u64,

    /// Permit plain-http discovery URLs (local identity providers only).
    #[arg(long, env = "WSGATE_ALLOW_INSECURE_DISCOVERY")]
    pub allow_insecure_discovery: bool,

    /// Send cadence of the `/clock` stream in milliseconds.
    #[arg(long, default_value_t = 1000, env = "WSGATE_CLOCK_INTERVAL_MS")]
    pub clock_interval_ms: u64,

    /// Send cadence of the `/ping` stream in milliseconds.
    #[arg(long, default_value_t = 5000, env = "WSGATE_PING_INTERVAL_MS")]
    pub ping_interval_ms: u64,

    /// Log format (text or json).
    #[arg(long, default_value = "text", env = "WSGATE_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "WSGATE_LOG_LEVEL")]
    pub log_level: String,
}

impl GateConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = reqwest::Url::parse(&self.discovery_url)
            .map_err(|e| anyhow::anyhow!("invalid --discovery-url {:?}: {e}", self.discovery_url))?;
        if url.scheme() != "https" && !self.allow_insecure_discovery {
            anyhow::bail!(
                "--discovery-url must use https (pass --allow-insecure-discovery to override)"
            );
        }

        if self.validate_audience && self.audience.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--audience is required unless --validate-audience false");
        }

        if self.clock_interval_ms == 0 || self.ping_interval_ms == 0 {
            anyhow::bail!("stream intervals must be positive");
        }

        match self.log_format.as_str() {
            "text" | "json" => Ok(()),
            other => anyhow::bail!("unknown --log-format {other:?} (expected text or json)"),
        }
    }

    /// Build the immutable validation parameters shared by every validation call.
    pub fn validation_parameters(&self) -> ValidationParameters {
        ValidationParameters {
            issuer: self.issuer.clone(),
            audience: self.audience.clone().filter(|a| !a.is_empty()),
            validate_issuer: self.validate_issuer,
            validate_audience: self.validate_audience,
            validate_lifetime: self.validate_lifetime,
            clock_skew: Duration::from_secs(self.clock_skew_secs),
        }
    }

    pub fn clock_interval(&self) -> Duration {
        Duration::from_millis(self.clock_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_secs(self.discovery_ttl_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
