// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signing-key discovery: OpenID configuration document, then its JWKS.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::auth::KeySource;
use crate::config::GateConfig;

/// Failures reaching or decoding the identity provider's published keys.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to build discovery client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    #[error("{url} returned a malformed document: {source}")]
    Malformed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} lists no signing keys")]
    NoSigningKeys { url: String },
}

/// Public keys published by the identity provider, as of one fetch.
#[derive(Debug, Clone)]
pub struct SigningKeySet {
    pub keys: JwkSet,
    pub issuer: String,
    pub jwks_uri: String,
    pub fetched_at: Instant,
}

impl SigningKeySet {
    pub fn new(keys: JwkSet, issuer: impl Into<String>, jwks_uri: impl Into<String>) -> Self {
        Self { keys, issuer: issuer.into(), jwks_uri: jwks_uri.into(), fetched_at: Instant::now() }
    }

    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.find(kid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Jwk> {
        self.keys.keys.iter()
    }

    pub fn key_ids(&self) -> Vec<&str> {
        self.iter().filter_map(|k| k.common.key_id.as_deref()).collect()
    }

    pub fn len(&self) -> usize {
        self.keys.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.keys.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    issuer: String,
    jwks_uri: String,
}

/// Process-wide cache of the most recently fetched [`SigningKeySet`].
///
/// Each refresh publishes a new `Arc` snapshot; callers keep the snapshot
/// they were handed, so a refresh never changes keys under a validation
/// that is already running.
pub struct KeyDiscovery {
    discovery_url: String,
    http: reqwest::Client,
    ttl: Duration,
    current: RwLock<Option<Arc<SigningKeySet>>>,
}

impl KeyDiscovery {
    /// `ttl` of zero fetches on every call.
    pub fn new(
        discovery_url: impl Into<String>,
        ttl: Duration,
        timeout: Duration,
        https_only: bool,
    ) -> Result<Self, DiscoveryError> {
        // reqwest is built without a bundled provider; ignore "already installed".
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .https_only(https_only)
            .timeout(timeout)
            .build()
            .map_err(DiscoveryError::Client)?;

        Ok(Self { discovery_url: discovery_url.into(), http, ttl, current: RwLock::new(None) })
    }

    pub fn from_config(config: &GateConfig) -> Result<Self, DiscoveryError> {
        Self::new(
            config.discovery_url.clone(),
            config.discovery_ttl(),
            config.discovery_timeout(),
            !config.allow_insecure_discovery,
        )
    }

    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }

    /// The last published snapshot, without fetching.
    pub async fn current(&self) -> Option<Arc<SigningKeySet>> {
        self.current.read().await.as_ref().map(Arc::clone)
    }

    /// Return the signing keys, refreshing from the identity provider unless
    /// a snapshot younger than the TTL exists.
    ///
    /// A failed refresh is returned as-is; the previous snapshot is never
    /// served in its place.
    pub async fn get_signing_keys(&self) -> Result<Arc<SigningKeySet>, DiscoveryError> {
        if let Some(fresh) = self.fresh_snapshot().await {
            return Ok(fresh);
        }

        let keys = Arc::new(self.fetch().await?);
        *self.current.write().await = Some(Arc::clone(&keys));
        Ok(keys)
    }

    async fn fresh_snapshot(&self) -> Option<Arc<SigningKeySet>> {
        if self.ttl.is_zero() {
            return None;
        }
        let guard = self.current.read().await;
        guard.as_ref().filter(|s| s.fetched_at.elapsed() < self.ttl).map(Arc::clone)
    }

    async fn fetch(&self) -> Result<SigningKeySet, DiscoveryError> {
        tracing::debug!(url = %self.discovery_url, "fetching openid configuration");
        let doc: OpenIdConfiguration = self.get_json(&self.discovery_url).await?;

        let keys: JwkSet = self.get_json(&doc.jwks_uri).await?;
        if keys.keys.is_empty() {
            return Err(DiscoveryError::NoSigningKeys { url: doc.jwks_uri });
        }

        tracing::debug!(issuer = %doc.issuer, keys = keys.keys.len(), "signing keys refreshed");
        Ok(SigningKeySet::new(keys, doc.issuer, doc.jwks_uri))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DiscoveryError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| DiscoveryError::Request { url: url.to_owned(), source })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DiscoveryError::Status { url: url.to_owned(), status });
        }

        resp.json::<T>().await.map_err(|source| DiscoveryError::Malformed { url: url.to_owned(), source })
    }
}

impl KeySource for KeyDiscovery {
    fn signing_keys(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<SigningKeySet>, DiscoveryError>> + Send + '_>> {
        Box::pin(self.get_signing_keys())
    }
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
