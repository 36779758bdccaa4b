//! Authorization server configuration.
//!
//! Plain typed configuration structs. Loading them from files or the
//! environment is left to the embedding application; every struct implements
//! `serde::Deserialize` with defaults for each field.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration of the authorization server engine.
///
/// # Example (TOML)
///
/// ```toml
/// [oauth2]
/// issuer = "https://auth.example.com"
///
/// [oauth2.tokens]
/// access_token_lifetime = "1h"
/// refresh_token_lifetime = "30d"
///
/// [oauth2.jwt_bearer]
/// audience = "https://auth.example.com/token"
/// allowed_algorithms = ["RS256", "ES256"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Public base URL of the authorization server.
    pub issuer: String,

    /// Token lifetimes and refresh-token policy.
    pub tokens: TokenConfig,

    /// Authorization endpoint behavior.
    pub authorization: AuthorizationConfig,

    /// JWT bearer grant (RFC 7523) settings.
    pub jwt_bearer: JwtBearerConfig,

    /// Client assertion (`client_secret_jwt` / `private_key_jwt`) settings.
    pub client_assertion: ClientAssertionConfig,

    /// Remote key set retrieval.
    pub jwks: JwksConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            tokens: TokenConfig::default(),
            authorization: AuthorizationConfig::default(),
            jwt_bearer: JwtBearerConfig::default(),
            client_assertion: ClientAssertionConfig::default(),
            jwks: JwksConfig::default(),
        }
    }
}

/// Token lifetimes and refresh token issuance rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Issue a refresh token alongside client_credentials access tokens.
    /// RFC 6749 §4.4.3 recommends against it.
    pub issue_refresh_token_with_client_credentials: bool,

    /// Issue a new refresh token on every refresh_token grant.
    pub refresh_token_rotation: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: Duration::from_secs(30),
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600),
            issue_refresh_token_with_client_credentials: false,
            refresh_token_rotation: false,
        }
    }
}

/// Authorization endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Honor an explicit `response_mode` query parameter.
    /// When disabled the response type's default mode is always used.
    pub allow_response_mode_parameter: bool,

    /// Require PKCE from public clients.
    pub enforce_pkce_for_public_clients: bool,

    /// External login page. Receives `authorization_id`.
    pub login_uri: String,

    /// External consent page. Receives `authorization_id`.
    pub consent_uri: String,

    /// External account selection page. Receives `authorization_id`.
    pub select_account_uri: String,

    /// How long a suspended authorization request is kept.
    #[serde(with = "humantime_serde")]
    pub suspended_request_lifetime: Duration,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            allow_response_mode_parameter: false,
            enforce_pkce_for_public_clients: true,
            login_uri: "/login".to_string(),
            consent_uri: "/consent".to_string(),
            select_account_uri: "/select-account".to_string(),
            suspended_request_lifetime: Duration::from_secs(600),
        }
    }
}

/// JWT bearer grant type configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtBearerConfig {
    /// Expected `aud` value of assertions. Defaults to the issuer when empty.
    pub audience: String,

    /// Signature algorithms accepted for self-issued assertions.
    pub allowed_algorithms: Vec<String>,

    /// Accept assertions issued by registered trusted issuers.
    pub trusted_issuers_enabled: bool,

    /// Reject assertions that are not encrypted.
    pub encryption_required: bool,

    /// Clock skew tolerance for `exp` and `nbf`.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,

    /// Assertions whose `exp` lies further in the future are rejected.
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,
}

impl Default for JwtBearerConfig {
    fn default() -> Self {
        Self {
            audience: String::new(),
            allowed_algorithms: default_signature_algorithms(),
            trusted_issuers_enabled: false,
            encryption_required: false,
            leeway: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

/// Client assertion authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientAssertionConfig {
    /// Expected `aud` value. Defaults to the issuer when empty.
    pub audience: String,

    /// Signature algorithms accepted for client assertions.
    pub allowed_algorithms: Vec<String>,

    /// Clock skew tolerance for `exp` and `nbf`.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for ClientAssertionConfig {
    fn default() -> Self {
        Self {
            audience: String::new(),
            allowed_algorithms: default_signature_algorithms(),
            leeway: Duration::from_secs(30),
        }
    }
}

/// Remote JWKS retrieval configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwksConfig {
    /// How long a fetched key set is reused.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Timeout applied to every `jwks_uri` fetch.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum accepted JWKS document size in bytes.
    pub max_response_size: usize,

    /// Refuse `jwks_uri` values that are not HTTPS.
    pub require_https: bool,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(10),
            max_response_size: 512 * 1024,
            require_https: true,
        }
    }
}

fn default_signature_algorithms() -> Vec<String> {
    ["RS256", "RS384", "RS512", "ES256", "ES384", "PS256", "HS256", "HS384", "HS512"]
        .iter()
        .map(|alg| (*alg).to_string())
        .collect()
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Returns the audience expected in JWT bearer assertions.
    #[must_use]
    pub fn jwt_bearer_audience(&self) -> &str {
        if self.jwt_bearer.audience.is_empty() {
            &self.issuer
        } else {
            &self.jwt_bearer.audience
        }
    }

    /// Returns the audience expected in client assertions.
    #[must_use]
    pub fn client_assertion_audience(&self) -> &str {
        if self.client_assertion.audience.is_empty() {
            &self.issuer
        } else {
            &self.client_assertion.audience
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the issuer is empty and
    /// `ConfigError::InvalidValue` if a lifetime is zero, an algorithm name is
    /// unknown or the JWKS limits are zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }

        let lifetimes = [
            ("authorization_code_lifetime", self.tokens.authorization_code_lifetime),
            ("access_token_lifetime", self.tokens.access_token_lifetime),
            ("refresh_token_lifetime", self.tokens.refresh_token_lifetime),
        ];
        for (name, lifetime) in lifetimes {
            if lifetime.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        for alg in self
            .jwt_bearer
            .allowed_algorithms
            .iter()
            .chain(&self.client_assertion.allowed_algorithms)
        {
            if alg.parse::<jsonwebtoken::Algorithm>().is_err() {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signature algorithm: '{alg}'"
                )));
            }
        }

        if self.jwks.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "jwks request_timeout must be > 0".to_string(),
            ));
        }

        if self.jwks.max_response_size == 0 {
            return Err(ConfigError::InvalidValue(
                "jwks max_response_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
