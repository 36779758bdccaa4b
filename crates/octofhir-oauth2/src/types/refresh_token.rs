//! Refresh token aggregate.
//!
//! A refresh token remembers every access token minted from it. Revoking the
//! refresh token does not revoke those access tokens.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::types::data_bag::DataBag;
use crate::types::event::{Aggregate, Event};
use crate::types::id::{AccessTokenId, ClientId, RefreshTokenId, ResourceOwnerId, ResourceServerId};

/// Fields of a newly issued refresh token.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    /// Token identifier, also the bearer value.
    pub id: RefreshTokenId,
    /// Client the token was issued to.
    pub client_id: ClientId,
    /// Entity the token acts for.
    pub resource_owner_id: ResourceOwnerId,
    /// Resource server restriction.
    pub resource_server_id: Option<ResourceServerId>,
    /// Expiry; `None` means the token does not expire.
    pub expires_at: Option<OffsetDateTime>,
    /// Parameters carried over to refreshed access tokens (e.g. `scope`).
    pub parameters: DataBag,
    /// Server-side metadata.
    pub metadata: DataBag,
}

/// Events recorded for a [`RefreshToken`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshTokenEvent {
    /// The token was issued.
    Created {
        /// Token identifier.
        id: RefreshTokenId,
        /// Client the token was issued to.
        client_id: ClientId,
        /// Entity the token acts for.
        resource_owner_id: ResourceOwnerId,
        /// Resource server restriction.
        resource_server_id: Option<ResourceServerId>,
        /// Expiry.
        #[serde(with = "time::serde::rfc3339::option")]
        expires_at: Option<OffsetDateTime>,
        /// Parameters.
        parameters: DataBag,
        /// Metadata.
        metadata: DataBag,
    },
    /// An access token was minted from this refresh token.
    AccessTokenAdded {
        /// The new access token.
        access_token_id: AccessTokenId,
    },
    /// The token was revoked.
    Revoked,
}

/// An issued refresh token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshToken {
    id: RefreshTokenId,
    client_id: ClientId,
    resource_owner_id: ResourceOwnerId,
    resource_server_id: Option<ResourceServerId>,
    expires_at: Option<OffsetDateTime>,
    parameters: DataBag,
    metadata: DataBag,
    access_token_ids: IndexSet<AccessTokenId>,
    revoked: bool,
}

impl Aggregate for RefreshToken {
    type Payload = RefreshTokenEvent;

    fn create_empty() -> Self {
        Self::default()
    }

    fn domain_id(&self) -> &str {
        self.id.as_str()
    }

    fn apply_payload(mut self, payload: &RefreshTokenEvent) -> Self {
        match payload {
            RefreshTokenEvent::Created {
                id,
                client_id,
                resource_owner_id,
                resource_server_id,
                expires_at,
                parameters,
                metadata,
            } => {
                self.id = id.clone();
                self.client_id = client_id.clone();
                self.resource_owner_id = resource_owner_id.clone();
                self.resource_server_id = resource_server_id.clone();
                self.expires_at = *expires_at;
                self.parameters = parameters.clone();
                self.metadata = metadata.clone();
            }
            RefreshTokenEvent::AccessTokenAdded { access_token_id } => {
                self.access_token_ids.insert(access_token_id.clone());
            }
            RefreshTokenEvent::Revoked => {
                self.revoked = true;
            }
        }
        self
    }
}

impl RefreshToken {
    /// Issues the token.
    #[must_use]
    pub fn create(&self, new: NewRefreshToken) -> (Self, Vec<Event<RefreshTokenEvent>>) {
        let domain_id = new.id.to_string();
        self.record(
            &domain_id,
            RefreshTokenEvent::Created {
                id: new.id,
                client_id: new.client_id,
                resource_owner_id: new.resource_owner_id,
                resource_server_id: new.resource_server_id,
                expires_at: new.expires_at,
                parameters: new.parameters,
                metadata: new.metadata,
            },
        )
    }

    /// Associates an access token minted from this refresh token.
    #[must_use]
    pub fn add_access_token(
        &self,
        access_token_id: AccessTokenId,
    ) -> (Self, Vec<Event<RefreshTokenEvent>>) {
        self.record(
            self.id.as_str(),
            RefreshTokenEvent::AccessTokenAdded { access_token_id },
        )
    }

    /// Revokes the token. Revoking twice records nothing.
    #[must_use]
    pub fn mark_as_revoked(&self) -> (Self, Vec<Event<RefreshTokenEvent>>) {
        if self.revoked {
            return (self.clone(), Vec::new());
        }
        self.record(self.id.as_str(), RefreshTokenEvent::Revoked)
    }

    /// Token identifier.
    #[must_use]
    pub fn id(&self) -> &RefreshTokenId {
        &self.id
    }

    /// Client the token was issued to.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Entity the token acts for.
    #[must_use]
    pub fn resource_owner_id(&self) -> &ResourceOwnerId {
        &self.resource_owner_id
    }

    /// Resource server restriction.
    #[must_use]
    pub fn resource_server_id(&self) -> Option<&ResourceServerId> {
        self.resource_server_id.as_ref()
    }

    /// Expiry.
    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_at
    }

    /// Parameters.
    #[must_use]
    pub fn parameters(&self) -> &DataBag {
        &self.parameters
    }

    /// Metadata.
    #[must_use]
    pub fn metadata(&self) -> &DataBag {
        &self.metadata
    }

    /// Access tokens minted from this refresh token, in issue order.
    #[must_use]
    pub fn access_token_ids(&self) -> &IndexSet<AccessTokenId> {
        &self.access_token_ids
    }

    /// Whether the token was revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Whether the token is past its expiry at `now`.
    #[must_use]
    pub fn has_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Whether the token can still be used at `now`.
    #[must_use]
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        !self.revoked && !self.has_expired(now)
    }

    /// RFC 7662 claims for an active token.
    #[must_use]
    pub fn introspection_claims(&self) -> Map<String, Value> {
        let mut claims = Map::new();
        claims.insert("client_id".to_string(), Value::from(self.client_id.as_str()));
        claims.insert(
            "sub".to_string(),
            Value::from(self.resource_owner_id.as_str()),
        );
        claims.insert("token_type".to_string(), Value::from("refresh_token"));
        if let Some(exp) = self.expires_at {
            claims.insert("exp".to_string(), Value::from(exp.unix_timestamp()));
        }
        if let Ok(scope) = self.parameters.get("scope") {
            claims.insert("scope".to_string(), scope.clone());
        }
        claims
    }
}
