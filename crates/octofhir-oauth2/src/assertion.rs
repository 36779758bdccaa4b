//! JWT assertions (RFC 7523).
//!
//! Shared by the JWT bearer grant and by `client_secret_jwt` /
//! `private_key_jwt` client authentication. An assertion is read twice: once
//! without verification to find out who issued it (and therefore which keys
//! to use), then fully verified against those keys.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::AuthResult;
use crate::error::AuthError;

/// `client_assertion_type` value for JWT client assertions.
pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Claims every assertion must carry.
pub const MANDATORY_CLAIMS: [&str; 4] = ["iss", "sub", "aud", "exp"];

/// Claims of a JWT assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Issuer.
    pub iss: String,

    /// Subject.
    pub sub: String,

    /// Audience, a single string or an array.
    pub aud: Audience,

    /// Expiration time as Unix timestamp.
    pub exp: i64,

    /// Not-before time as Unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Issued-at time as Unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// JWT ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Any other claim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Audience claim can be a single string or an array of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// Single string audience.
    String(String),
    /// Array of audience strings.
    Array(Vec<String>),
}

impl Audience {
    /// Checks if the audience contains the specified value.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::String(s) => s == value,
            Self::Array(arr) => arr.iter().any(|s| s == value),
        }
    }
}

/// Returns `true` if `token` has the five segments of a compact JWE.
#[must_use]
pub fn is_encrypted(token: &str) -> bool {
    token.split('.').count() == 5
}

/// Decodes the protected header of a compact JWS.
///
/// # Errors
///
/// Returns `AuthError::InvalidRequest` if the value is not a single-signature
/// compact JWS.
pub fn decode_header(assertion: &str) -> AuthResult<Header> {
    if assertion.split('.').count() != 3 {
        return Err(AuthError::invalid_request(
            "The assertion is not a compact JWS.",
        ));
    }
    jsonwebtoken::decode_header(assertion)
        .map_err(|e| AuthError::invalid_request(format!("The assertion header is invalid: {e}")))
}

/// Reads the claims of an assertion without checking its signature.
///
/// Only used to pick the verification keys.
///
/// # Errors
///
/// Returns `AuthError::InvalidRequest` if the payload cannot be decoded or a
/// mandatory claim is missing.
pub fn peek_claims(assertion: &str) -> AuthResult<AssertionClaims> {
    let mut parts = assertion.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::invalid_request(
            "The assertion is not a compact JWS.",
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::invalid_request("The assertion payload is not base64url."))?;
    let raw: Map<String, Value> = serde_json::from_slice(&bytes)
        .map_err(|_| AuthError::invalid_request("The assertion payload is not a JSON object."))?;

    let missing: Vec<&str> = MANDATORY_CLAIMS
        .iter()
        .copied()
        .filter(|claim| !raw.contains_key(*claim))
        .collect();
    if !missing.is_empty() {
        return Err(AuthError::invalid_request(format!(
            "The following claim(s) are mandatory: {}.",
            missing.join(", ")
        )));
    }

    serde_json::from_value(Value::Object(raw))
        .map_err(|e| AuthError::invalid_request(format!("The assertion claims are invalid: {e}")))
}

/// Verification rules for one assertion.
#[derive(Debug, Clone)]
pub struct AssertionRules<'a> {
    /// Algorithm taken from the header, already checked against the allow-list.
    pub algorithm: Algorithm,
    /// Audience the assertion must be addressed to.
    pub audience: &'a str,
    /// Clock skew tolerance.
    pub leeway: Duration,
    /// Upper bound on how far in the future `exp` may lie.
    pub max_lifetime: Option<Duration>,
}

/// Verifies the signature and the time and audience claims.
///
/// # Errors
///
/// Returns the `jsonwebtoken` error unchanged; callers decide which OAuth
/// error it maps to.
pub fn verify(
    assertion: &str,
    key: &DecodingKey,
    rules: &AssertionRules<'_>,
    now: i64,
) -> Result<AssertionClaims, VerifyError> {
    let mut validation = Validation::new(rules.algorithm);
    validation.set_audience(&[rules.audience]);
    validation.set_required_spec_claims(&MANDATORY_CLAIMS);
    validation.validate_nbf = true;
    validation.leeway = rules.leeway.as_secs();

    let claims = jsonwebtoken::decode::<AssertionClaims>(assertion, key, &validation)
        .map_err(VerifyError::Jwt)?
        .claims;

    if let Some(max_lifetime) = rules.max_lifetime {
        let limit = now.saturating_add(i64::try_from(max_lifetime.as_secs()).unwrap_or(i64::MAX));
        if claims.exp > limit {
            return Err(VerifyError::LifetimeTooLong);
        }
    }

    Ok(claims)
}

/// Failure of [`verify`].
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Signature, time or audience check failed.
    #[error("{0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// `exp` lies beyond the configured maximum lifetime.
    #[error("The assertion expires too far in the future.")]
    LifetimeTooLong,
}

/// Parses an allow-list of algorithm names, skipping unknown ones.
#[must_use]
pub fn parse_algorithms(names: &[String]) -> Vec<Algorithm> {
    names.iter().filter_map(|name| name.parse().ok()).collect()
}

/// Returns `true` for HMAC algorithms.
#[must_use]
pub fn is_symmetric(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}
