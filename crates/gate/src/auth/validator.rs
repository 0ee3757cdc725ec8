// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token validation: signature against the discovered key set, then
//! issuer, audience and lifetime against [`ValidationParameters`].

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::{DiscoveryError, KeySource, SigningKeySet, ValidationParameters};

/// The only query shape that carries a token. Matched case-insensitively.
pub const BEARER_PREFIX: &str = "?bearer_token=";

/// Asymmetric algorithms only; a published JWKS never authorises HMAC.
const ACCEPTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Why a presented token was not accepted. Logged, never sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum AuthFailure {
    #[error("query string does not carry a bearer token")]
    MissingToken,

    #[error("bearer token is empty")]
    EmptyToken,

    #[error("token algorithm {0:?} is not accepted")]
    UnsupportedAlgorithm(Algorithm),

    #[error("no signing key with id {0:?}")]
    UnknownKeyId(String),

    #[error("no signing key can verify this token")]
    NoUsableKey,

    #[error("token rejected: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl AuthFailure {
    /// Short stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::EmptyToken => "empty_token",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::UnknownKeyId(_) => "unknown_key_id",
            Self::NoUsableKey => "no_usable_key",
            Self::Jwt(e) => match e.kind() {
                ErrorKind::ExpiredSignature => "expired",
                ErrorKind::ImmatureSignature => "not_yet_valid",
                ErrorKind::InvalidSignature => "invalid_signature",
                ErrorKind::InvalidIssuer => "invalid_issuer",
                ErrorKind::InvalidAudience => "invalid_audience",
                ErrorKind::MissingRequiredClaim(_) => "missing_claim",
                ErrorKind::InvalidAlgorithm => "algorithm_mismatch",
                _ => "malformed",
            },
        }
    }
}

/// Outcome of a failed validation call.
///
/// Discovery failures are kept apart from authentication failures so the
/// gate can answer 503 instead of a 401 that looks like a bad token.
#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthFailure),

    #[error("signing keys unavailable: {0}")]
    Discovery(#[from] DiscoveryError),
}

/// Claims of a token that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedToken {
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub audience: Vec<String>,
    pub expires_at: Option<u64>,
    pub issued_at: Option<u64>,
    pub key_id: Option<String>,
    pub algorithm: Algorithm,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
struct Claims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
    // NumericDate may carry a fraction.
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    iat: Option<f64>,
}

/// Validates bearer tokens against the current signing keys.
#[derive(Clone)]
pub struct TokenValidator {
    params: Arc<ValidationParameters>,
    keys: Arc<dyn KeySource>,
}

impl TokenValidator {
    pub fn new(params: Arc<ValidationParameters>, keys: Arc<dyn KeySource>) -> Self {
        Self { params, keys }
    }

    pub fn params(&self) -> &ValidationParameters {
        &self.params
    }

    /// Validate the raw query string of an upgrade request.
    ///
    /// Anything not starting with [`BEARER_PREFIX`] fails before any key fetch.
    pub async fn validate(&self, raw_query: &str) -> Result<ValidatedToken, ValidateError> {
        let token = extract_bearer(raw_query)?;
        self.validate_token(token).await
    }

    /// Validate a bare token. Fetches signing keys on every call unless the
    /// key source caches.
    pub async fn validate_token(&self, token: &str) -> Result<ValidatedToken, ValidateError> {
        let keys = self.keys.signing_keys().await?;
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthFailure::EmptyToken.into());
        }
        Ok(verify(token, &keys, &self.params)?)
    }
}

/// Return everything after the `?bearer_token=` prefix, untrimmed.
pub fn extract_bearer(raw_query: &str) -> Result<&str, AuthFailure> {
    let head = raw_query.get(..BEARER_PREFIX.len()).ok_or(AuthFailure::MissingToken)?;
    if !head.eq_ignore_ascii_case(BEARER_PREFIX) {
        return Err(AuthFailure::MissingToken);
    }
    Ok(&raw_query[BEARER_PREFIX.len()..])
}

/// Verify `token` against one key-set snapshot.
///
/// With a `kid` only that key is tried; without one every key in the set is
/// tried until a signature verifies.
pub fn verify(
    token: &str,
    keys: &SigningKeySet,
    params: &ValidationParameters,
) -> Result<ValidatedToken, AuthFailure> {
    let header = jsonwebtoken::decode_header(token)?;
    if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
        return Err(AuthFailure::UnsupportedAlgorithm(header.alg));
    }

    let candidates: Vec<&Jwk> = match header.kid.as_deref() {
        Some(kid) => vec![keys.find(kid).ok_or_else(|| AuthFailure::UnknownKeyId(kid.to_owned()))?],
        None => keys.iter().collect(),
    };

    let validation = build_validation(header.alg, params);
    let mut last_err = None;
    for jwk in candidates {
        let key = match DecodingKey::from_jwk(jwk) {
            Ok(k) => k,
            Err(e) => {
                tracing::debug!(kid = ?jwk.common.key_id, err = %e, "skipping unusable signing key");
                continue;
            }
        };

        match jsonwebtoken::decode::<Claims>(token, &key, &validation) {
            Ok(data) => return Ok(ValidatedToken::new(data.claims, header.kid, header.alg)),
            // Wrong key for this token; another key in the set may still match.
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm | ErrorKind::InvalidKeyFormat
                ) =>
            {
                last_err = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(last_err.map_or(AuthFailure::NoUsableKey, AuthFailure::from))
}

fn build_validation(alg: Algorithm, params: &ValidationParameters) -> Validation {
    let mut validation = Validation::new(alg);
    validation.leeway = params.clock_skew.as_secs();

    let mut required = Vec::new();
    if params.validate_lifetime {
        validation.validate_nbf = true;
        required.push("exp");
    } else {
        validation.validate_exp = false;
    }

    if params.validate_issuer {
        validation.set_issuer(&[params.issuer.as_str()]);
        required.push("iss");
    }

    if params.validate_audience {
        // No configured audience leaves an empty set, which matches nothing.
        validation.set_audience(params.audience.as_slice());
        required.push("aud");
    } else {
        validation.validate_aud = false;
    }

    validation.set_required_spec_claims(&required);
    validation
}

impl ValidatedToken {
    fn new(claims: Claims, key_id: Option<String>, algorithm: Algorithm) -> Self {
        let audience = match claims.aud {
            Some(Audience::One(a)) => vec![a],
            Some(Audience::Many(list)) => list,
            None => Vec::new(),
        };
        Self {
            subject: claims.sub,
            issuer: claims.iss,
            audience,
            expires_at: claims.exp.map(whole_seconds),
            issued_at: claims.iat.map(whole_seconds),
            key_id,
            algorithm,
        }
    }
}

fn whole_seconds(t: f64) -> u64 {
    // `as` saturates; negative and NaN become 0.
    t.floor() as u64
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
