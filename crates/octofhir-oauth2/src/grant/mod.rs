//! Grant types (RFC 6749 §4, RFC 7523).
//!
//! A grant type runs in three steps driven by the token endpoint:
//!
//! 1. [`GrantType::check_request`] validates the body shape.
//! 2. [`GrantType::prepare_response`] may resolve the client or resource
//!    owner without granting anything yet.
//! 3. [`GrantType::grant`] performs the authorization decision and fills
//!    [`GrantTypeData`] with what the access token will carry.

pub mod authorization_code;
pub mod client_credentials;
pub mod jwt_bearer;
pub mod refresh_token;

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::AuthResult;
use crate::error::AuthError;
use crate::http::RequestParameters;
use crate::types::{Client, DataBag, ResourceOwnerId, ResourceServerId};

pub use authorization_code::AuthorizationCodeGrantType;
pub use client_credentials::ClientCredentialsGrantType;
pub use jwt_bearer::{AssertionDecrypter, JwtBearerGrantType};
pub use refresh_token::RefreshTokenGrantType;

/// Metadata key asking the refresh token issuer to issue a refresh token.
pub const METADATA_ISSUE_REFRESH_TOKEN: &str = "issue_refresh_token";

/// Metadata key naming the refresh token a refreshed access token came from.
pub const METADATA_REFRESH_TOKEN_ID: &str = "refresh_token_id";

/// Metadata key naming the authorization code an access token came from.
pub const METADATA_AUTHORIZATION_CODE_ID: &str = "authorization_code_id";

/// Per-request state threaded through a grant type.
#[derive(Debug, Clone, Default)]
pub struct GrantTypeData {
    client: Option<Client>,
    resource_owner_id: Option<ResourceOwnerId>,
    resource_server_id: Option<ResourceServerId>,
    parameters: DataBag,
    metadata: DataBag,
}

impl GrantTypeData {
    /// Creates empty data.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates data seeded with an authenticated client.
    #[must_use]
    pub fn for_client(client: Option<Client>) -> Self {
        Self {
            client,
            ..Self::default()
        }
    }

    /// The client the token is issued to.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if no client has been set.
    pub fn client(&self) -> AuthResult<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| AuthError::internal("The client is not set."))
    }

    /// Returns `true` if a client has been set.
    #[must_use]
    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Sets the client.
    pub fn set_client(&mut self, client: Client) {
        self.client = Some(client);
    }

    /// The entity the token acts for.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if no resource owner has been set.
    pub fn resource_owner_id(&self) -> AuthResult<&ResourceOwnerId> {
        self.resource_owner_id
            .as_ref()
            .ok_or_else(|| AuthError::internal("The resource owner is not set."))
    }

    /// Sets the resource owner.
    pub fn set_resource_owner_id(&mut self, resource_owner_id: ResourceOwnerId) {
        self.resource_owner_id = Some(resource_owner_id);
    }

    /// Resource server the token will be restricted to.
    #[must_use]
    pub fn resource_server_id(&self) -> Option<&ResourceServerId> {
        self.resource_server_id.as_ref()
    }

    /// Restricts the token to a resource server.
    pub fn set_resource_server_id(&mut self, resource_server_id: Option<ResourceServerId>) {
        self.resource_server_id = resource_server_id;
    }

    /// Parameters returned with the access token.
    #[must_use]
    pub fn parameters(&self) -> &DataBag {
        &self.parameters
    }

    /// Sets a parameter.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.parameters = self.parameters.with(key, value);
    }

    /// Server-side metadata stored on the access token.
    #[must_use]
    pub fn metadata(&self) -> &DataBag {
        &self.metadata
    }

    /// Sets a metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata = self.metadata.with(key, value);
    }
}

/// An OAuth 2.0 grant type.
#[async_trait]
pub trait GrantType: Send + Sync {
    /// Value of the `grant_type` parameter.
    fn name(&self) -> &'static str;

    /// Response types of the authorization endpoint tied to this grant.
    fn associated_response_types(&self) -> &'static [&'static str] {
        &[]
    }

    /// Body parameters the request must carry.
    fn required_parameters(&self) -> &'static [&'static str] {
        &[]
    }

    /// Validates the request shape.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` naming every missing parameter.
    fn check_request(&self, params: &RequestParameters) -> AuthResult<()> {
        let missing: Vec<&str> = self
            .required_parameters()
            .iter()
            .copied()
            .filter(|name| !params.has(name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::missing_parameters(&missing))
        }
    }

    /// Resolves what can be resolved before the client check.
    ///
    /// # Errors
    ///
    /// Returns an OAuth error if the request cannot be served.
    async fn prepare_response(
        &self,
        _params: &RequestParameters,
        _data: &mut GrantTypeData,
    ) -> AuthResult<()> {
        Ok(())
    }

    /// Performs the authorization decision.
    ///
    /// # Errors
    ///
    /// Returns an OAuth error if the grant is refused.
    async fn grant(&self, params: &RequestParameters, data: &mut GrantTypeData) -> AuthResult<()>;
}

/// The grant type named by the request, attached to the request extensions
/// by [`GrantTypeMiddleware`](crate::pipe::stages::GrantTypeMiddleware).
#[derive(Clone)]
pub struct ResolvedGrantType(pub Arc<dyn GrantType>);

/// Registered grant types, keyed by name.
#[derive(Clone, Default)]
pub struct GrantTypeManager {
    grant_types: IndexMap<&'static str, Arc<dyn GrantType>>,
}

impl GrantTypeManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a grant type, replacing one with the same name.
    pub fn add(&mut self, grant_type: Arc<dyn GrantType>) {
        self.grant_types.insert(grant_type.name(), grant_type);
    }

    /// Returns `true` if the grant type is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.grant_types.contains_key(name)
    }

    /// Returns a registered grant type.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnsupportedGrantType` if it is unknown.
    pub fn get(&self, name: &str) -> AuthResult<Arc<dyn GrantType>> {
        self.grant_types
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::unsupported_grant_type(name))
    }

    /// Registered grant type names.
    #[must_use]
    pub fn list(&self) -> Vec<&'static str> {
        self.grant_types.keys().copied().collect()
    }
}

/// Checks that `requested` only names scopes contained in `granted`.
pub(crate) fn is_scope_subset(requested: &str, granted: &[String]) -> bool {
    requested
        .split_whitespace()
        .all(|scope| granted.iter().any(|g| g == scope))
}
