//! Client aggregate.
//!
//! Registration metadata (RFC 7591 names) lives in the `parameters` bag; the
//! derived queries below read it with the RFC defaults applied.

use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use url::Url;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::AuthResult;
use crate::error::AuthError;
use crate::types::data_bag::DataBag;
use crate::types::event::{Aggregate, Event};
use crate::types::id::{ClientId, ResourceOwnerId};

/// Events recorded for a [`Client`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The client was registered.
    Created {
        /// Public client identifier.
        client_id: ClientId,
        /// Owner of the registration.
        owner_id: Option<ResourceOwnerId>,
        /// Registration metadata.
        parameters: DataBag,
    },
    /// Registration metadata was replaced.
    ParametersUpdated {
        /// The new metadata.
        parameters: DataBag,
    },
    /// The registration changed hands.
    OwnerChanged {
        /// The new owner.
        owner_id: Option<ResourceOwnerId>,
    },
    /// The client was deleted.
    Deleted,
}

/// A registered OAuth client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Client {
    client_id: ClientId,
    owner_id: Option<ResourceOwnerId>,
    parameters: DataBag,
    deleted: bool,
}

impl Aggregate for Client {
    type Payload = ClientEvent;

    fn create_empty() -> Self {
        Self::default()
    }

    fn domain_id(&self) -> &str {
        self.client_id.as_str()
    }

    fn apply_payload(mut self, payload: &ClientEvent) -> Self {
        match payload {
            ClientEvent::Created {
                client_id,
                owner_id,
                parameters,
            } => {
                self.client_id = client_id.clone();
                self.owner_id = owner_id.clone();
                self.parameters = parameters.clone();
            }
            ClientEvent::ParametersUpdated { parameters } => {
                self.parameters = parameters.clone();
            }
            ClientEvent::OwnerChanged { owner_id } => {
                self.owner_id = owner_id.clone();
            }
            ClientEvent::Deleted => {
                self.deleted = true;
            }
        }
        self
    }
}

/// Authentication method names used at the token endpoint (RFC 7591 §2).
pub mod auth_method {
    /// Public client, no credentials.
    pub const NONE: &str = "none";
    /// HTTP Basic with the client secret.
    pub const CLIENT_SECRET_BASIC: &str = "client_secret_basic";
    /// Client secret in the form body.
    pub const CLIENT_SECRET_POST: &str = "client_secret_post";
    /// JWT assertion signed with the client secret.
    pub const CLIENT_SECRET_JWT: &str = "client_secret_jwt";
    /// JWT assertion signed with a registered private key.
    pub const PRIVATE_KEY_JWT: &str = "private_key_jwt";
}

impl Client {
    /// Registers the client.
    #[must_use]
    pub fn create(
        &self,
        client_id: ClientId,
        owner_id: Option<ResourceOwnerId>,
        parameters: DataBag,
    ) -> (Self, Vec<Event<ClientEvent>>) {
        let domain_id = client_id.to_string();
        self.record(
            &domain_id,
            ClientEvent::Created {
                client_id,
                owner_id,
                parameters,
            },
        )
    }

    /// Replaces the registration metadata.
    #[must_use]
    pub fn with_parameters(&self, parameters: DataBag) -> (Self, Vec<Event<ClientEvent>>) {
        self.record(
            self.client_id.as_str(),
            ClientEvent::ParametersUpdated { parameters },
        )
    }

    /// Changes the owner of the registration.
    #[must_use]
    pub fn with_owner(&self, owner_id: Option<ResourceOwnerId>) -> (Self, Vec<Event<ClientEvent>>) {
        self.record(self.client_id.as_str(), ClientEvent::OwnerChanged { owner_id })
    }

    /// Flags the client as deleted. Deleting twice records nothing.
    #[must_use]
    pub fn mark_as_deleted(&self) -> (Self, Vec<Event<ClientEvent>>) {
        if self.deleted {
            return (self.clone(), Vec::new());
        }
        self.record(self.client_id.as_str(), ClientEvent::Deleted)
    }

    /// Public client identifier.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Owner of the registration.
    #[must_use]
    pub fn owner_id(&self) -> Option<&ResourceOwnerId> {
        self.owner_id.as_ref()
    }

    /// Registration metadata.
    #[must_use]
    pub fn parameters(&self) -> &DataBag {
        &self.parameters
    }

    /// Whether the client has been deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns `true` if the client may use the grant type.
    ///
    /// Defaults to `authorization_code` only when `grant_types` is absent.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: &str) -> bool {
        self.parameters
            .get_string_list("grant_types")
            .unwrap_or_else(|| vec!["authorization_code".to_string()])
            .iter()
            .any(|g| g == grant_type)
    }

    /// Returns `true` if the client may use the response type.
    ///
    /// Multi-value response types (`code id_token`) compare as sets.
    #[must_use]
    pub fn is_response_type_allowed(&self, response_type: &str) -> bool {
        let requested = normalize_response_type(response_type);
        self.parameters
            .get_string_list("response_types")
            .map(|types| {
                types
                    .iter()
                    .map(|t| normalize_response_type(t))
                    .any(|t| t == requested)
            })
            .unwrap_or_else(|| requested == "code")
    }

    /// Token endpoint authentication method, `client_secret_basic` by default.
    #[must_use]
    pub fn token_endpoint_auth_method(&self) -> &str {
        self.parameters
            .get_str("token_endpoint_auth_method")
            .unwrap_or(auth_method::CLIENT_SECRET_BASIC)
    }

    /// Returns `true` if the client authenticates with no credentials.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.token_endpoint_auth_method() == auth_method::NONE
    }

    /// The registered client secret.
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.parameters.get_str("client_secret")
    }

    /// Returns `true` if the registered secret has expired.
    ///
    /// A `client_secret_expires_at` of `0` means the secret never expires.
    #[must_use]
    pub fn is_secret_expired(&self, now: time::OffsetDateTime) -> bool {
        match self
            .parameters
            .get("client_secret_expires_at")
            .ok()
            .and_then(serde_json::Value::as_i64)
        {
            Some(0) | None => false,
            Some(expires_at) => now.unix_timestamp() >= expires_at,
        }
    }

    /// Registered redirect URIs.
    #[must_use]
    pub fn redirect_uris(&self) -> Vec<String> {
        self.parameters
            .get_string_list("redirect_uris")
            .unwrap_or_default()
    }

    /// Returns `true` if every requested scope token is registered for the
    /// client. Clients without a `scope` parameter may request any scope.
    #[must_use]
    pub fn is_scope_allowed(&self, requested: &str) -> bool {
        match self.parameters.get_string_list("scope") {
            None => true,
            Some(allowed) => requested
                .split_whitespace()
                .all(|s| allowed.iter().any(|a| a == s)),
        }
    }

    /// Key set registered inline through the `jwks` parameter.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` if the stored value is not a JWKS.
    pub fn jwks(&self) -> AuthResult<Option<JwkSet>> {
        if !self.parameters.has("jwks") {
            return Ok(None);
        }
        let raw = self.parameters.get("jwks")?.clone();
        serde_json::from_value(raw)
            .map(Some)
            .map_err(|e| AuthError::invalid_client(format!("The client key set is invalid: {e}")))
    }

    /// Location of the client's remote key set.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` if the stored value is not a URL.
    pub fn jwks_uri(&self) -> AuthResult<Option<Url>> {
        self.parameters
            .get_str("jwks_uri")
            .map(|raw| {
                Url::parse(raw).map_err(|e| {
                    AuthError::invalid_client(format!("The client \"jwks_uri\" is invalid: {e}"))
                })
            })
            .transpose()
    }

    /// Synthesizes a symmetric key set from the client secret.
    ///
    /// Used to verify `client_secret_jwt` assertions.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if the key set cannot be built.
    pub fn secret_key_set(&self) -> AuthResult<Option<JwkSet>> {
        let Some(secret) = self.client_secret() else {
            return Ok(None);
        };
        let set = serde_json::json!({
            "keys": [{
                "kty": "oct",
                "use": "sig",
                "k": URL_SAFE_NO_PAD.encode(secret.as_bytes()),
            }]
        });
        Ok(Some(serde_json::from_value(set)?))
    }
}

fn normalize_response_type(response_type: &str) -> String {
    let mut parts: Vec<&str> = response_type.split_whitespace().collect();
    parts.sort_unstable();
    parts.join(" ")
}
