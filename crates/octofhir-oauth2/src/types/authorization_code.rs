//! Authorization code aggregate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::types::data_bag::DataBag;
use crate::types::event::{Aggregate, Event};
use crate::types::id::{AuthorizationCodeId, ClientId, ResourceServerId, UserAccountId};

/// Fields of a newly issued authorization code.
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode {
    /// Code identifier, also the `code` value.
    pub id: AuthorizationCodeId,
    /// Client the code was issued to.
    pub client_id: ClientId,
    /// End user who approved the request.
    pub user_account_id: UserAccountId,
    /// Query parameters of the authorization request.
    pub query_parameters: DataBag,
    /// Redirect URI the code was delivered to, if one was sent.
    pub redirect_uri: Option<String>,
    /// Expiry.
    pub expires_at: OffsetDateTime,
    /// Parameters handed to the access token (e.g. `scope`).
    pub parameters: DataBag,
    /// Server-side metadata.
    pub metadata: DataBag,
    /// Resource server restriction.
    pub resource_server_id: Option<ResourceServerId>,
    /// Issue a refresh token when the code is exchanged.
    pub issue_refresh_token: bool,
}

/// Events recorded for an [`AuthorizationCode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorizationCodeEvent {
    /// The code was issued.
    Created {
        /// Code identifier.
        id: AuthorizationCodeId,
        /// Client.
        client_id: ClientId,
        /// Approving end user.
        user_account_id: UserAccountId,
        /// Authorization request query parameters.
        query_parameters: DataBag,
        /// Redirect URI.
        redirect_uri: Option<String>,
        /// Expiry.
        #[serde(with = "time::serde::rfc3339")]
        expires_at: OffsetDateTime,
        /// Parameters.
        parameters: DataBag,
        /// Metadata.
        metadata: DataBag,
        /// Resource server restriction.
        resource_server_id: Option<ResourceServerId>,
        /// Issue a refresh token on exchange.
        issue_refresh_token: bool,
    },
    /// The code was exchanged for a token.
    MarkedAsUsed,
    /// The code was revoked.
    Revoked,
}

/// An issued authorization code.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationCode {
    id: AuthorizationCodeId,
    client_id: ClientId,
    user_account_id: UserAccountId,
    query_parameters: DataBag,
    redirect_uri: Option<String>,
    expires_at: OffsetDateTime,
    parameters: DataBag,
    metadata: DataBag,
    resource_server_id: Option<ResourceServerId>,
    issue_refresh_token: bool,
    used: bool,
    revoked: bool,
}

impl Aggregate for AuthorizationCode {
    type Payload = AuthorizationCodeEvent;

    fn create_empty() -> Self {
        Self {
            id: AuthorizationCodeId::default(),
            client_id: ClientId::default(),
            user_account_id: UserAccountId::default(),
            query_parameters: DataBag::new(),
            redirect_uri: None,
            expires_at: OffsetDateTime::UNIX_EPOCH,
            parameters: DataBag::new(),
            metadata: DataBag::new(),
            resource_server_id: None,
            issue_refresh_token: false,
            used: false,
            revoked: false,
        }
    }

    fn domain_id(&self) -> &str {
        self.id.as_str()
    }

    fn apply_payload(mut self, payload: &AuthorizationCodeEvent) -> Self {
        match payload {
            AuthorizationCodeEvent::Created {
                id,
                client_id,
                user_account_id,
                query_parameters,
                redirect_uri,
                expires_at,
                parameters,
                metadata,
                resource_server_id,
                issue_refresh_token,
            } => {
                self.id = id.clone();
                self.client_id = client_id.clone();
                self.user_account_id = user_account_id.clone();
                self.query_parameters = query_parameters.clone();
                self.redirect_uri = redirect_uri.clone();
                self.expires_at = *expires_at;
                self.parameters = parameters.clone();
                self.metadata = metadata.clone();
                self.resource_server_id = resource_server_id.clone();
                self.issue_refresh_token = *issue_refresh_token;
            }
            AuthorizationCodeEvent::MarkedAsUsed => {
                self.used = true;
            }
            AuthorizationCodeEvent::Revoked => {
                self.revoked = true;
            }
        }
        self
    }
}

impl AuthorizationCode {
    /// Issues the code.
    #[must_use]
    pub fn create(&self, new: NewAuthorizationCode) -> (Self, Vec<Event<AuthorizationCodeEvent>>) {
        let domain_id = new.id.to_string();
        self.record(
            &domain_id,
            AuthorizationCodeEvent::Created {
                id: new.id,
                client_id: new.client_id,
                user_account_id: new.user_account_id,
                query_parameters: new.query_parameters,
                redirect_uri: new.redirect_uri,
                expires_at: new.expires_at,
                parameters: new.parameters,
                metadata: new.metadata,
                resource_server_id: new.resource_server_id,
                issue_refresh_token: new.issue_refresh_token,
            },
        )
    }

    /// Marks the code as exchanged. Marking twice records nothing.
    #[must_use]
    pub fn mark_as_used(&self) -> (Self, Vec<Event<AuthorizationCodeEvent>>) {
        if self.used {
            return (self.clone(), Vec::new());
        }
        self.record(self.id.as_str(), AuthorizationCodeEvent::MarkedAsUsed)
    }

    /// Revokes the code. Revoking twice records nothing.
    #[must_use]
    pub fn mark_as_revoked(&self) -> (Self, Vec<Event<AuthorizationCodeEvent>>) {
        if self.revoked {
            return (self.clone(), Vec::new());
        }
        self.record(self.id.as_str(), AuthorizationCodeEvent::Revoked)
    }

    /// Code identifier.
    #[must_use]
    pub fn id(&self) -> &AuthorizationCodeId {
        &self.id
    }

    /// Client the code was issued to.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Approving end user.
    #[must_use]
    pub fn user_account_id(&self) -> &UserAccountId {
        &self.user_account_id
    }

    /// Authorization request query parameters.
    #[must_use]
    pub fn query_parameters(&self) -> &DataBag {
        &self.query_parameters
    }

    /// Redirect URI the code was delivered to.
    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    /// Expiry.
    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// Parameters handed to the access token.
    #[must_use]
    pub fn parameters(&self) -> &DataBag {
        &self.parameters
    }

    /// Metadata.
    #[must_use]
    pub fn metadata(&self) -> &DataBag {
        &self.metadata
    }

    /// Resource server restriction.
    #[must_use]
    pub fn resource_server_id(&self) -> Option<&ResourceServerId> {
        self.resource_server_id.as_ref()
    }

    /// Whether a refresh token is issued on exchange.
    #[must_use]
    pub fn issue_refresh_token(&self) -> bool {
        self.issue_refresh_token
    }

    /// Whether the code was already exchanged.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Whether the code was revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Whether the code is past its expiry at `now`.
    #[must_use]
    pub fn has_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    /// PKCE `(method, challenge)` recorded with the code.
    ///
    /// The method defaults to `plain` when only a challenge was sent.
    #[must_use]
    pub fn pkce_challenge(&self) -> Option<(String, String)> {
        let challenge = self.query_parameters.get_str("code_challenge")?;
        let method = self
            .query_parameters
            .get_str("code_challenge_method")
            .unwrap_or("plain");
        Some((method.to_string(), challenge.to_string()))
    }

    /// RFC 7662 claims for an unused code.
    #[must_use]
    pub fn introspection_claims(&self) -> Map<String, Value> {
        let mut claims = Map::new();
        claims.insert("client_id".to_string(), Value::from(self.client_id.as_str()));
        claims.insert("sub".to_string(), Value::from(self.user_account_id.as_str()));
        claims.insert(
            "exp".to_string(),
            Value::from(self.expires_at.unix_timestamp()),
        );
        if let Ok(scope) = self.parameters.get("scope") {
            claims.insert("scope".to_string(), scope.clone());
        }
        claims
    }
}
