//! Access token aggregate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::types::data_bag::DataBag;
use crate::types::event::{Aggregate, Event};
use crate::types::id::{AccessTokenId, ClientId, ResourceOwnerId, ResourceServerId};

/// Fields of a newly issued access token.
#[derive(Debug, Clone)]
pub struct NewAccessToken {
    /// Token identifier, also the bearer value.
    pub id: AccessTokenId,
    /// Client the token was issued to.
    pub client_id: ClientId,
    /// Entity the token acts for.
    pub resource_owner_id: ResourceOwnerId,
    /// Resource server the token is restricted to.
    pub resource_server_id: Option<ResourceServerId>,
    /// Expiry; `None` means the token does not expire.
    pub expires_at: Option<OffsetDateTime>,
    /// Parameters returned to the client (e.g. `scope`).
    pub parameters: DataBag,
    /// Server-side metadata never shown to the client.
    pub metadata: DataBag,
}

/// Events recorded for an [`AccessToken`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessTokenEvent {
    /// The token was issued.
    Created {
        /// Token identifier.
        id: AccessTokenId,
        /// Client the token was issued to.
        client_id: ClientId,
        /// Entity the token acts for.
        resource_owner_id: ResourceOwnerId,
        /// Resource server restriction.
        resource_server_id: Option<ResourceServerId>,
        /// Expiry.
        #[serde(with = "time::serde::rfc3339::option")]
        expires_at: Option<OffsetDateTime>,
        /// Client-visible parameters.
        parameters: DataBag,
        /// Server-side metadata.
        metadata: DataBag,
    },
    /// The token was revoked.
    Revoked,
}

/// An issued access token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessToken {
    id: AccessTokenId,
    client_id: ClientId,
    resource_owner_id: ResourceOwnerId,
    resource_server_id: Option<ResourceServerId>,
    expires_at: Option<OffsetDateTime>,
    parameters: DataBag,
    metadata: DataBag,
    revoked: bool,
}

impl Aggregate for AccessToken {
    type Payload = AccessTokenEvent;

    fn create_empty() -> Self {
        Self::default()
    }

    fn domain_id(&self) -> &str {
        self.id.as_str()
    }

    fn apply_payload(mut self, payload: &AccessTokenEvent) -> Self {
        match payload {
            AccessTokenEvent::Created {
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
            AccessTokenEvent::Revoked => {
                self.revoked = true;
            }
        }
        self
    }
}

impl AccessToken {
    /// Issues the token.
    #[must_use]
    pub fn create(&self, new: NewAccessToken) -> (Self, Vec<Event<AccessTokenEvent>>) {
        let domain_id = new.id.to_string();
        self.record(
            &domain_id,
            AccessTokenEvent::Created {
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

    /// Revokes the token. Revoking twice records nothing.
    #[must_use]
    pub fn mark_as_revoked(&self) -> (Self, Vec<Event<AccessTokenEvent>>) {
        if self.revoked {
            return (self.clone(), Vec::new());
        }
        self.record(self.id.as_str(), AccessTokenEvent::Revoked)
    }

    /// Token identifier.
    #[must_use]
    pub fn id(&self) -> &AccessTokenId {
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

    /// Client-visible parameters.
    #[must_use]
    pub fn parameters(&self) -> &DataBag {
        &self.parameters
    }

    /// Server-side metadata.
    #[must_use]
    pub fn metadata(&self) -> &DataBag {
        &self.metadata
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

    /// Seconds until expiry at `now`, never negative.
    #[must_use]
    pub fn expires_in(&self, now: OffsetDateTime) -> Option<i64> {
        self.expires_at
            .map(|exp| (exp - now).whole_seconds().max(0))
    }

    /// Token endpoint response fields for this token.
    #[must_use]
    pub fn response_data(&self, now: OffsetDateTime) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("access_token".to_string(), Value::from(self.id.as_str()));
        if let Some(expires_in) = self.expires_in(now) {
            data.insert("expires_in".to_string(), Value::from(expires_in));
        }
        for (key, value) in self.parameters.iter() {
            data.insert(key.clone(), value.clone());
        }
        data
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
        if let Some(exp) = self.expires_at {
            claims.insert("exp".to_string(), Value::from(exp.unix_timestamp()));
        }
        if let Some(rs) = &self.resource_server_id {
            claims.insert("aud".to_string(), Value::from(rs.as_str()));
        }
        for (key, value) in self.parameters.iter() {
            claims.insert(key.clone(), value.clone());
        }
        claims
    }
}
