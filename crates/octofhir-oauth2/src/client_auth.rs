//! Client authentication for the token, revocation and authorization code
//! exchange requests.
//!
//! # Authentication Methods
//!
//! - `none` - Public clients (client_id only)
//! - `client_secret_basic` - HTTP Basic Auth with client_id:client_secret
//! - `client_secret_post` - client_id and client_secret in request body
//! - `client_secret_jwt` / `private_key_jwt` - JWT client assertion (RFC 7523)
//!
//! A request must carry credentials for exactly one method. The method found
//! must also be the one registered for the client in
//! `token_endpoint_auth_method`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::Algorithm;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::assertion::{self, AssertionRules, CLIENT_ASSERTION_TYPE_JWT_BEARER};
use crate::crypto::constant_time_eq;
use crate::error::AuthError;
use crate::http::RequestParameters;
use crate::jwks::{JwksCache, find_decoding_key};
use crate::types::{Client, ClientId, auth_method};

/// Credentials extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    /// No credentials (public client).
    None,
    /// A shared secret.
    Secret(String),
    /// A signed JWT assertion.
    Assertion(String),
}

/// A client authenticated by an earlier pipe stage.
///
/// Stored in the request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    /// The authenticated client.
    pub client: Client,
    /// Name of the method used.
    pub auth_method: &'static str,
}

/// A way for clients to prove their identity.
#[async_trait]
pub trait AuthenticationMethod: Send + Sync {
    /// `token_endpoint_auth_method` values this method handles.
    fn supported_methods(&self) -> &'static [&'static str];

    /// Extracts the client identifier and credentials.
    ///
    /// Returns `Ok(None)` when the request carries nothing for this method.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are present but malformed.
    fn find_client_id_and_credentials(
        &self,
        headers: &HeaderMap,
        params: &RequestParameters,
    ) -> AuthResult<Option<(ClientId, ClientCredentials)>>;

    /// Checks the credentials against the client registration.
    ///
    /// # Errors
    ///
    /// Returns an error if key material cannot be resolved.
    async fn is_client_authenticated(
        &self,
        client: &Client,
        credentials: &ClientCredentials,
    ) -> AuthResult<bool>;
}

// =============================================================================
// none
// =============================================================================

/// Public clients send only `client_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneAuthentication;

#[async_trait]
impl AuthenticationMethod for NoneAuthentication {
    fn supported_methods(&self) -> &'static [&'static str] {
        &[auth_method::NONE]
    }

    fn find_client_id_and_credentials(
        &self,
        headers: &HeaderMap,
        params: &RequestParameters,
    ) -> AuthResult<Option<(ClientId, ClientCredentials)>> {
        if headers.contains_key(header::AUTHORIZATION)
            || params.has("client_secret")
            || params.has("client_assertion")
        {
            return Ok(None);
        }
        Ok(params
            .get("client_id")
            .map(|id| (ClientId::new(id), ClientCredentials::None)))
    }

    async fn is_client_authenticated(
        &self,
        client: &Client,
        credentials: &ClientCredentials,
    ) -> AuthResult<bool> {
        Ok(client.is_public() && *credentials == ClientCredentials::None)
    }
}

// =============================================================================
// client_secret_basic / client_secret_post
// =============================================================================

fn is_secret_valid(client: &Client, credentials: &ClientCredentials) -> bool {
    let ClientCredentials::Secret(presented) = credentials else {
        return false;
    };
    let Some(registered) = client.client_secret() else {
        return false;
    };
    !client.is_secret_expired(OffsetDateTime::now_utc())
        && constant_time_eq(registered.as_bytes(), presented.as_bytes())
}

/// HTTP Basic authentication with the client secret.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientSecretBasic;

#[async_trait]
impl AuthenticationMethod for ClientSecretBasic {
    fn supported_methods(&self) -> &'static [&'static str] {
        &[auth_method::CLIENT_SECRET_BASIC]
    }

    fn find_client_id_and_credentials(
        &self,
        headers: &HeaderMap,
        _params: &RequestParameters,
    ) -> AuthResult<Option<(ClientId, ClientCredentials)>> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let Ok(value) = value.to_str() else {
            return Ok(None);
        };
        if !value.trim_start().starts_with("Basic ") {
            return Ok(None);
        }
        let (client_id, secret) = parse_basic_auth(value).ok_or_else(|| {
            AuthError::invalid_client("The Basic authorization header is malformed.")
        })?;
        Ok(Some((
            ClientId::new(client_id),
            ClientCredentials::Secret(secret),
        )))
    }

    async fn is_client_authenticated(
        &self,
        client: &Client,
        credentials: &ClientCredentials,
    ) -> AuthResult<bool> {
        Ok(is_secret_valid(client, credentials))
    }
}

/// Client secret sent in the request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientSecretPost;

#[async_trait]
impl AuthenticationMethod for ClientSecretPost {
    fn supported_methods(&self) -> &'static [&'static str] {
        &[auth_method::CLIENT_SECRET_POST]
    }

    fn find_client_id_and_credentials(
        &self,
        _headers: &HeaderMap,
        params: &RequestParameters,
    ) -> AuthResult<Option<(ClientId, ClientCredentials)>> {
        match (params.get("client_id"), params.get("client_secret")) {
            (Some(id), Some(secret)) => Ok(Some((
                ClientId::new(id),
                ClientCredentials::Secret(secret.to_string()),
            ))),
            _ => Ok(None),
        }
    }

    async fn is_client_authenticated(
        &self,
        client: &Client,
        credentials: &ClientCredentials,
    ) -> AuthResult<bool> {
        Ok(is_secret_valid(client, credentials))
    }
}

// =============================================================================
// client_secret_jwt / private_key_jwt
// =============================================================================

/// JWT client assertions (RFC 7523 §2.2).
///
/// `iss` and `sub` must both equal the client identifier. `client_secret_jwt`
/// assertions are HMAC signed with the client secret; `private_key_jwt`
/// assertions are signed with a key from the client's `jwks` or `jwks_uri`.
pub struct ClientAssertionJwt {
    jwks: Arc<JwksCache>,
    audience: String,
    allowed_algorithms: Vec<Algorithm>,
    leeway: Duration,
}

impl ClientAssertionJwt {
    /// Creates the method.
    #[must_use]
    pub fn new(
        jwks: Arc<JwksCache>,
        audience: impl Into<String>,
        allowed_algorithms: Vec<Algorithm>,
        leeway: Duration,
    ) -> Self {
        Self {
            jwks,
            audience: audience.into(),
            allowed_algorithms,
            leeway,
        }
    }
}

#[async_trait]
impl AuthenticationMethod for ClientAssertionJwt {
    fn supported_methods(&self) -> &'static [&'static str] {
        &[auth_method::CLIENT_SECRET_JWT, auth_method::PRIVATE_KEY_JWT]
    }

    fn find_client_id_and_credentials(
        &self,
        _headers: &HeaderMap,
        params: &RequestParameters,
    ) -> AuthResult<Option<(ClientId, ClientCredentials)>> {
        let (Some(assertion_type), Some(jwt)) =
            (params.get("client_assertion_type"), params.get("client_assertion"))
        else {
            return Ok(None);
        };
        if assertion_type != CLIENT_ASSERTION_TYPE_JWT_BEARER {
            return Err(AuthError::invalid_request(format!(
                "Unsupported \"client_assertion_type\" \"{assertion_type}\"."
            )));
        }

        let claims = assertion::peek_claims(jwt)
            .map_err(|e| AuthError::invalid_client(e.description()))?;
        if claims.iss != claims.sub {
            return Err(AuthError::invalid_client(
                "The claims \"iss\" and \"sub\" of the client assertion must be identical.",
            ));
        }
        if let Some(client_id) = params.get("client_id")
            && client_id != claims.sub
        {
            return Err(AuthError::invalid_client(
                "The client assertion does not match \"client_id\".",
            ));
        }

        Ok(Some((
            ClientId::new(claims.sub),
            ClientCredentials::Assertion(jwt.to_string()),
        )))
    }

    async fn is_client_authenticated(
        &self,
        client: &Client,
        credentials: &ClientCredentials,
    ) -> AuthResult<bool> {
        let ClientCredentials::Assertion(jwt) = credentials else {
            return Ok(false);
        };

        let header = assertion::decode_header(jwt)
            .map_err(|e| AuthError::invalid_client(e.description()))?;
        let algorithm = header.alg;
        if !self.allowed_algorithms.contains(&algorithm) {
            tracing::debug!(
                client_id = %client.client_id(),
                ?algorithm,
                "Assertion algorithm not allowed"
            );
            return Ok(false);
        }

        let expects_symmetric =
            client.token_endpoint_auth_method() == auth_method::CLIENT_SECRET_JWT;
        if assertion::is_symmetric(algorithm) != expects_symmetric {
            return Ok(false);
        }
        if expects_symmetric && client.is_secret_expired(OffsetDateTime::now_utc()) {
            return Ok(false);
        }

        let key_set = self.jwks.client_key_set(client).await?;
        let Ok(key) = find_decoding_key(&key_set, header.kid.as_deref(), algorithm) else {
            return Ok(false);
        };

        let rules = AssertionRules {
            algorithm,
            audience: &self.audience,
            leeway: self.leeway,
            max_lifetime: None,
        };
        match assertion::verify(jwt, &key, &rules, OffsetDateTime::now_utc().unix_timestamp()) {
            Ok(claims) => Ok(claims.iss == client.client_id().as_str()
                && claims.sub == client.client_id().as_str()),
            Err(e) => {
                tracing::debug!(
                    client_id = %client.client_id(),
                    error = %e,
                    "Client assertion rejected"
                );
                Ok(false)
            }
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// A client identified by one authentication method.
pub struct ClientIdentification {
    /// Method whose credentials were found.
    pub method: Arc<dyn AuthenticationMethod>,
    /// Claimed client identifier.
    pub client_id: ClientId,
    /// Credentials to check.
    pub credentials: ClientCredentials,
}

/// Registered authentication methods.
#[derive(Clone, Default)]
pub struct AuthenticationMethodManager {
    methods: Vec<Arc<dyn AuthenticationMethod>>,
}

impl AuthenticationMethodManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method.
    pub fn add(&mut self, method: Arc<dyn AuthenticationMethod>) {
        self.methods.push(method);
    }

    /// Names of every supported `token_endpoint_auth_method`.
    #[must_use]
    pub fn list(&self) -> Vec<&'static str> {
        self.methods
            .iter()
            .flat_map(|m| m.supported_methods().iter().copied())
            .collect()
    }

    /// Finds the method the request uses.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` if credentials for more than one
    /// method are present.
    pub fn identify(
        &self,
        headers: &HeaderMap,
        params: &RequestParameters,
    ) -> AuthResult<Option<ClientIdentification>> {
        let mut found = None;
        for method in &self.methods {
            if let Some((client_id, credentials)) =
                method.find_client_id_and_credentials(headers, params)?
            {
                if found.is_some() {
                    return Err(AuthError::invalid_request(
                        "Only one authentication method may be used to authenticate the client.",
                    ));
                }
                found = Some(ClientIdentification {
                    method: Arc::clone(method),
                    client_id,
                    credentials,
                });
            }
        }
        Ok(found)
    }

    /// Checks identified credentials against the client registration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` if the client is deleted, registered
    /// for another method, or the credentials do not match.
    pub async fn authenticate(
        &self,
        client: &Client,
        identification: &ClientIdentification,
    ) -> AuthResult<AuthenticatedClient> {
        if client.is_deleted() {
            return Err(AuthError::invalid_client("Client authentication failed."));
        }

        let registered = client.token_endpoint_auth_method();
        let Some(auth_method) = identification
            .method
            .supported_methods()
            .iter()
            .copied()
            .find(|m| *m == registered)
        else {
            return Err(AuthError::invalid_client(
                "The client authentication method is not allowed for this client.",
            ));
        };

        if !identification
            .method
            .is_client_authenticated(client, &identification.credentials)
            .await?
        {
            return Err(AuthError::invalid_client("Client authentication failed."));
        }

        Ok(AuthenticatedClient {
            client: client.clone(),
            auth_method,
        })
    }
}

/// Parses an HTTP Basic `Authorization` header value.
///
/// Returns `Some((user, password))` if valid, `None` otherwise. Both parts
/// are form-urlencoded per RFC 6749 §2.3.1.
#[must_use]
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.trim().strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    // Split on first colon (password may contain colons)
    let (user, password) = credentials.split_once(':')?;
    if user.is_empty() {
        return None;
    }

    let unescape = |s: &str| -> String {
        url::form_urlencoded::parse(format!("v={s}").as_bytes())
            .next()
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    };
    Some((unescape(user), unescape(password)))
}
