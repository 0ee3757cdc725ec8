// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token validation against a remotely discovered signing-key set.

pub mod discovery;
pub mod validator;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub use discovery::{DiscoveryError, KeyDiscovery, SigningKeySet};
pub use validator::{AuthFailure, TokenValidator, ValidateError, ValidatedToken, BEARER_PREFIX};

/// Immutable token validation settings, built once at startup.
///
/// Signing keys are not part of this value; they live in the discovery
/// cache and are replaced as a whole on refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationParameters {
    pub issuer: String,
    pub audience: Option<String>,
    pub validate_issuer: bool,
    pub validate_audience: bool,
    pub validate_lifetime: bool,
    pub clock_skew: Duration,
}

/// Supplier of the signing keys a token is verified against.
///
/// Object-safe for use as `Arc<dyn KeySource>`.
pub trait KeySource: Send + Sync + 'static {
    fn signing_keys(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<SigningKeySet>, DiscoveryError>> + Send + '_>>;
}
