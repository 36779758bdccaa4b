//! Key set resolution for signature verification.
//!
//! Clients publish keys in three ways, chosen by their token endpoint auth
//! method: an inline `jwks`, a remote `jwks_uri`, or (for
//! `client_secret_jwt`) the client secret itself as a symmetric key.
//! Remote sets are fetched through a [`JwksFetcher`] and cached for
//! `jwks.cache_ttl`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use url::Url;

use crate::AuthResult;
use crate::config::JwksConfig;
use crate::error::AuthError;
use crate::types::{Client, auth_method};

/// Retrieves a key set from a URL.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Fetches and parses the key set published at `uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be fetched or parsed.
    async fn fetch(&self, uri: &Url) -> AuthResult<JwkSet>;
}

/// [`JwksFetcher`] over HTTP with a request timeout and a size limit.
pub struct HttpJwksFetcher {
    client: reqwest::Client,
    max_response_size: usize,
    require_https: bool,
}

impl HttpJwksFetcher {
    /// Creates a fetcher from the JWKS configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &JwksConfig) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::internal_with_source("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            max_response_size: config.max_response_size,
            require_https: config.require_https,
        })
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self, uri: &Url) -> AuthResult<JwkSet> {
        if self.require_https && uri.scheme() != "https" {
            return Err(AuthError::invalid_client("The \"jwks_uri\" must use HTTPS."));
        }

        let response = self
            .client
            .get(uri.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(jwks_uri = %uri, error = %e, "Failed to fetch JWKS");
                AuthError::invalid_client("The client key set could not be retrieved.")
            })?;

        if !response.status().is_success() {
            tracing::warn!(jwks_uri = %uri, status = %response.status(), "JWKS fetch failed");
            return Err(AuthError::invalid_client(
                "The client key set could not be retrieved.",
            ));
        }

        if let Some(len) = response.content_length()
            && len > self.max_response_size as u64
        {
            return Err(AuthError::invalid_client("The client key set is too large."));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::invalid_client(format!("Failed to read JWKS: {e}")))?;
        if body.len() > self.max_response_size {
            return Err(AuthError::invalid_client("The client key set is too large."));
        }

        serde_json::from_slice(&body)
            .map_err(|e| AuthError::invalid_client(format!("The client key set is invalid: {e}")))
    }
}

struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// TTL cache in front of a [`JwksFetcher`].
pub struct JwksCache {
    fetcher: Arc<dyn JwksFetcher>,
    cache: RwLock<HashMap<String, CachedJwks>>,
    ttl: Duration,
}

impl JwksCache {
    /// Creates a cache over `fetcher`.
    #[must_use]
    pub fn new(fetcher: Arc<dyn JwksFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Creates a cache over an [`HttpJwksFetcher`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &JwksConfig) -> AuthResult<Self> {
        Ok(Self::new(
            Arc::new(HttpJwksFetcher::new(config)?),
            config.cache_ttl,
        ))
    }

    /// Returns the key set at `uri`, fetching it when absent or stale.
    ///
    /// # Errors
    ///
    /// Propagates fetch errors.
    pub async fn get(&self, uri: &Url) -> AuthResult<JwkSet> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(uri.as_str())
                && cached.fetched_at.elapsed() < self.ttl
            {
                return Ok(cached.jwks.clone());
            }
        }

        let jwks = self.fetcher.fetch(uri).await?;
        tracing::debug!(jwks_uri = %uri, keys = jwks.keys.len(), "JWKS fetched");

        let mut cache = self.cache.write().await;
        cache.insert(
            uri.to_string(),
            CachedJwks {
                jwks: jwks.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(jwks)
    }

    /// Drops a cached key set.
    pub async fn invalidate(&self, uri: &Url) {
        self.cache.write().await.remove(uri.as_str());
    }

    /// Resolves the key set used to verify assertions signed by `client`.
    ///
    /// `client_secret_jwt` clients get a symmetric key built from their
    /// secret; everyone else must register `jwks` or `jwks_uri`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` if the client has no usable keys.
    pub async fn client_key_set(&self, client: &Client) -> AuthResult<JwkSet> {
        if client.token_endpoint_auth_method() == auth_method::CLIENT_SECRET_JWT {
            return client
                .secret_key_set()?
                .ok_or_else(|| AuthError::invalid_client("The client has no secret."));
        }

        if let Some(jwks) = client.jwks()? {
            return Ok(jwks);
        }
        if let Some(uri) = client.jwks_uri()? {
            return self.get(&uri).await;
        }

        Err(AuthError::invalid_client(
            "The client has no registered key set.",
        ))
    }
}

/// Finds the key matching `kid` and `algorithm` and converts it for
/// verification.
///
/// # Errors
///
/// Returns `AuthError::InvalidGrant` if no key matches or the key is unusable.
pub fn find_decoding_key(
    jwks: &JwkSet,
    kid: Option<&str>,
    algorithm: Algorithm,
) -> AuthResult<DecodingKey> {
    let algorithm_name = format!("{algorithm:?}");
    let jwk = jwks
        .keys
        .iter()
        .find(|key| {
            if let Some(expected) = kid
                && key.common.key_id.as_deref() != Some(expected)
            {
                return false;
            }
            if let Some(key_alg) = &key.common.key_algorithm
                && key_alg.to_string() != algorithm_name
            {
                return false;
            }
            if let Some(key_use) = &key.common.public_key_use
                && *key_use != PublicKeyUse::Signature
            {
                return false;
            }
            key_matches_family(key, algorithm)
        })
        .ok_or_else(|| match kid {
            Some(kid) => AuthError::invalid_grant(format!("The key \"{kid}\" is unknown.")),
            None => AuthError::invalid_grant("No suitable key found."),
        })?;

    decoding_key(jwk)
}

fn key_matches_family(jwk: &Jwk, algorithm: Algorithm) -> bool {
    use Algorithm::*;
    match &jwk.algorithm {
        AlgorithmParameters::OctetKey(_) => matches!(algorithm, HS256 | HS384 | HS512),
        AlgorithmParameters::RSA(_) => {
            matches!(algorithm, RS256 | RS384 | RS512 | PS256 | PS384 | PS512)
        }
        AlgorithmParameters::EllipticCurve(_) => matches!(algorithm, ES256 | ES384),
        AlgorithmParameters::OctetKeyPair(_) => matches!(algorithm, EdDSA),
    }
}

fn decoding_key(jwk: &Jwk) -> AuthResult<DecodingKey> {
    match &jwk.algorithm {
        AlgorithmParameters::OctetKey(oct) => URL_SAFE_NO_PAD
            .decode(oct.value.trim_end_matches('='))
            .map(|secret| DecodingKey::from_secret(&secret))
            .map_err(|e| AuthError::invalid_grant(format!("Invalid symmetric key: {e}"))),
        _ => DecodingKey::from_jwk(jwk)
            .map_err(|e| AuthError::invalid_grant(format!("Invalid JWK: {e}"))),
    }
}
